//! Axum router setup for the relay

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;

use crate::{
    handlers::{get_snapshot, health_check},
    websocket::ws_handler,
    ServerState,
};

/// Create the axum router with all routes.
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        // WebSocket endpoint for live collaboration
        .route("/ws", get(ws_handler))
        // REST API endpoints
        .route("/api/snapshot", get(get_snapshot))
        .route("/api/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
