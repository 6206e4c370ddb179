//! WebSocket upgrade and per-subscriber forward loop.
//!
//! The protocol is push-only: subscribers get one JSON record per tick
//! and are expected to say nothing back. Inbound frames are ignored
//! except as liveness signals.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval, timeout, Instant};
use tracing::debug;

use crate::registry::{Registry, SubscriberId};
use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// Unregister on every exit path, including panics in the forward loop.
struct SubscriberGuard(AppState, SubscriberId);
impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.0.registry.unregister(self.1);
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = Registry::channel();
    let id = state.registry.register(tx);
    let _guard = SubscriberGuard(state.clone(), id);

    let send_timeout = state.config.send_timeout;
    let liveness_deadline = state.config.ping_interval + state.config.pong_timeout;
    let mut ping = interval(state.config.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_heard = Instant::now();

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            payload = rx.recv() => {
                // None: registry dropped our channel (slow consumer or shutdown)
                let Some(payload) = payload else { break };
                match timeout(send_timeout, ws_tx.send(Message::Text(payload))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        debug!(subscriber = %id, %err, "send failed");
                        break;
                    }
                    Err(_) => {
                        debug!(subscriber = %id, "send timed out");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if last_heard.elapsed() > liveness_deadline {
                    debug!(subscriber = %id, "no liveness signal, closing");
                    break;
                }
                if timeout(send_timeout, ws_tx.send(Message::Ping(Vec::new())))
                    .await
                    .map_or(true, |r| r.is_err())
                {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {
                        // pongs, pings, stray text: all count as liveness
                        last_heard = Instant::now();
                    }
                }
            }
        }
    }

    let _ = ws_tx.close().await;
}
