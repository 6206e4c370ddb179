//! pistats_agent: samples host telemetry once per tick and pushes it as
//! JSON to every connected WebSocket subscriber.

pub mod broadcast;
pub mod collect;
pub mod config;
pub mod registry;
pub mod state;
pub mod types;
pub mod ws;

use axum::{routing::get, Router};

use crate::state::AppState;

/// Build the agent's HTTP router: a single WS endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}
