//! Subscriber registry: tracks connected channels and fans payloads out
//! to all of them, isolating per-subscriber failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

/// Per-subscriber outbound queue depth. A subscriber that falls this far
/// behind the tick cadence is considered dead and gets dropped.
const CHANNEL_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct Registry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<String>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(CHANNEL_DEPTH)
    }

    pub fn register(&self, tx: mpsc::Sender<String>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.insert(id, tx);
            debug!(subscriber = %id, total = subs.len(), "subscriber registered");
        }
        id
    }

    pub fn unregister(&self, id: SubscriberId) {
        if let Ok(mut subs) = self.subscribers.lock() {
            if subs.remove(&id).is_some() {
                debug!(subscriber = %id, total = subs.len(), "subscriber unregistered");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every subscriber channel, closing the per-connection forward
    /// loops. Used on shutdown.
    pub fn clear(&self) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.clear();
        }
    }

    /// Send `payload` to every currently registered subscriber.
    ///
    /// The subscriber set is snapshotted up front, so registrations and
    /// removals racing with this call only affect the next tick. A full
    /// or closed channel unregisters that subscriber; the rest still
    /// receive the payload.
    pub fn broadcast(&self, payload: &str) -> usize {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<String>)> = match self.subscribers.lock() {
            Ok(subs) => subs.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
            Err(_) => return 0,
        };

        let mut delivered = 0;
        for (id, tx) in snapshot {
            match tx.try_send(payload.to_owned()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    debug!(subscriber = %id, %err, "dropping unresponsive subscriber");
                    self.unregister(id);
                }
            }
        }
        delivered
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_unregister_updates_len() {
        let reg = Registry::new();
        assert!(reg.is_empty());

        let (tx, _rx) = Registry::channel();
        let id = reg.register(tx);
        assert_eq!(reg.len(), 1);

        reg.unregister(id);
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn unregistered_before_tick_receives_nothing() {
        let reg = Registry::new();
        let (tx, mut rx) = Registry::channel();
        let id = reg.register(tx);
        reg.unregister(id);

        assert_eq!(reg.broadcast("tick"), 0);
        // channel is closed once the registry drops the sender
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let reg = Registry::new();
        let (tx1, mut rx1) = Registry::channel();
        let (tx2, mut rx2) = Registry::channel();
        reg.register(tx1);
        reg.register(tx2);

        assert_eq!(reg.broadcast("payload"), 2);
        assert_eq!(rx1.recv().await.as_deref(), Some("payload"));
        assert_eq!(rx2.recv().await.as_deref(), Some("payload"));
    }

    #[tokio::test]
    async fn stalled_subscriber_is_dropped_without_blocking_others() {
        let reg = Registry::new();

        // Fill one subscriber's queue so the next try_send fails.
        let (stalled_tx, _stalled_rx) = Registry::channel();
        for _ in 0..CHANNEL_DEPTH {
            stalled_tx.try_send("backlog".into()).expect("fill queue");
        }
        reg.register(stalled_tx);

        let (live_tx, mut live_rx) = Registry::channel();
        reg.register(live_tx);

        assert_eq!(reg.broadcast("tick"), 1);
        assert_eq!(live_rx.recv().await.as_deref(), Some("tick"));
        // the stalled subscriber was removed
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn disconnected_subscriber_is_dropped() {
        let reg = Registry::new();
        let (tx, rx) = Registry::channel();
        reg.register(tx);
        drop(rx);

        assert_eq!(reg.broadcast("tick"), 0);
        assert!(reg.is_empty());
    }
}
