//! End-to-end test: run the broadcaster in-process, connect one
//! WebSocket subscriber, and check the pushed stream.

use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use pistats_agent::broadcast::spawn_broadcast_loop;
use pistats_agent::config::Config;
use pistats_agent::state::AppState;
use pistats_agent::types::StatsRecord;

// Scaled-down tick (100ms instead of the default 1s) so ten tick
// periods fit in about a second of test time.
const TICK: Duration = Duration::from_millis(100);

#[tokio::test]
async fn subscriber_receives_parseable_records_every_tick() {
    let config = Config::from_lookup(|key| match key {
        "PISTATS_TICK_MS" => Some(TICK.as_millis().to_string()),
        _ => None,
    });
    let state = AppState::new(config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let cancel = CancellationToken::new();
    let tick_handle = spawn_broadcast_loop(state.clone(), cancel.clone());

    let shutdown = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, pistats_agent::router(state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .expect("server");
    });

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("connect subscriber");

    // ten tick periods, generous deadline for slow CI hosts
    let deadline = tokio::time::Instant::now() + TICK * 10 + Duration::from_secs(5);
    let mut records = 0usize;
    while records < 9 {
        let msg = tokio::time::timeout_at(deadline, ws.next())
            .await
            .expect("stream stalled before 9 records")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(json) = msg {
            let record: StatsRecord = serde_json::from_str(&json).expect("parseable record");
            assert_eq!(record.system.connected_clients, 1);
            assert!(record.cpu.usage_percent >= 0.0 && record.cpu.usage_percent <= 100.0);
            assert!(record.processes.top_cpu_usage.len() <= 10);
            records += 1;
        }
    }

    cancel.cancel();
    let _ = tick_handle.await;
    let _ = server.await;
}
