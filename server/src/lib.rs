pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod midi_input;
pub mod persistence;
pub mod session_runtime;
pub mod ws;

use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use api::AppState;

/// Assembles the full router: REST endpoints plus the per-session event
/// WebSocket, with CORS and request tracing applied uniformly.
pub fn build_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<axum::http::HeaderValue> = cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins).allow_methods(tower_http::cors::Any).allow_headers(tower_http::cors::Any)
    };

    api::router(state.clone()).merge(ws::router(state)).layer(cors).layer(TraceLayer::new_for_http())
}
