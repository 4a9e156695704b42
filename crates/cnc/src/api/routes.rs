//! Router construction.

use std::path::Path;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::ws::ws_handler;

use super::handlers;
use super::state::AppState;

/// Build the router. `static_dir`, when set, is served under `/ui`.
pub fn create_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::list_rules))
        .route("/health", get(handlers::health))
        .route("/ws", get(ws_handler))
        .route("/ws/ui", get(ws_handler))
        .route("/ws/grafana-agent", get(ws_handler));

    if let Some(dir) = static_dir {
        router = router.nest_service("/ui", ServeDir::new(dir));
    }

    router
        .fallback(handlers::not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
