//! The runnable gateway binary's library half: router construction, the
//! `/ws/{client_id}` session handler, auth, and process-scoped state.
//! Split from `main.rs` so integration tests can build the router directly.

pub mod auth;
pub mod session;
pub mod state;

use axum::routing::get;
use axum::Router;

pub use state::{AppState, PluginFactory};

/// Builds the axum router: the session endpoint plus liveness/readiness
/// probes, matching the teacher's `build_router` shape.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/{client_id}", get(session::ws_upgrade))
        .route("/healthz", get(healthz))
        .route("/readyz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
