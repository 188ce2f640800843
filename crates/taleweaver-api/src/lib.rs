//! Taleweaver HTTP API.
//!
//! Exposes the turn orchestrator over JSON endpoints and streams session
//! events as server-sent events.

use axum::Router;

pub mod config;
pub mod error;
pub mod generation;
pub mod routes;
pub mod sink;
pub mod state;
pub mod telemetry;

/// Builds the application router. `main` adds the HTTP layers on top.
pub fn app(state: state::AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/sessions", routes::sessions::router())
        .with_state(state)
}
