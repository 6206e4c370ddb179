//! The tick task: capture, serialize, fan out — once per interval.

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collect;
use crate::state::AppState;

/// Spawn the broadcast loop. Ticks stay on the interval grid
/// (`MissedTickBehavior::Skip`), so one slow capture delays at most the
/// tick it belongs to and never compounds across the run.
pub fn spawn_broadcast_loop(state: AppState, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(state.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick_ms = state.config.tick.as_millis() as u64, "broadcast loop started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("broadcast loop shutting down");
                    break;
                }

                _ = tick.tick() => {
                    if state.registry.is_empty() {
                        continue;
                    }
                    let record = collect::capture(&state).await;
                    match serde_json::to_string(&record) {
                        Ok(payload) => {
                            let delivered = state.registry.broadcast(&payload);
                            debug!(delivered, "broadcast tick");
                        }
                        Err(err) => {
                            // skip this tick, keep the loop alive
                            warn!(%err, "failed to serialize stats record");
                        }
                    }
                }
            }
        }

        // closing the channels unblocks every per-subscriber forward loop
        state.registry.clear();
    })
}
