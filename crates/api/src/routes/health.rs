//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub event_store: &'static str,
    pub lock_manager: &'static str,
}

/// GET /health: reports liveness and which backends are wired.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        event_store: state.backends.event_store,
        lock_manager: state.backends.lock_manager,
    })
}
