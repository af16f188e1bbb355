//! REST API handlers for the relay

use std::sync::Arc;

use axum::{
    extract::State,
    response::{IntoResponse, Json},
};
use serde::Serialize;

use crate::ServerState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub participants: usize,
    pub nodes: usize,
    pub connections: usize,
}

/// The full current canvas as JSON, for non-WebSocket consumers.
pub async fn get_snapshot(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let snapshot = state.store.read().await.snapshot();
    Json(snapshot)
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let store = state.store.read().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        participants: state.participants.len(),
        nodes: store.node_count(),
        connections: store.connection_count(),
    })
}
