//! Batcher diagnostics

use axum::{extract::State, routing::get, Json, Router};

use crate::batcher::BatcherStats;
use crate::AppState;

/// GET /api/batcher/status
///
/// Queue depth, scheduler phase, and lifetime counters.
pub async fn batcher_status(State(state): State<AppState>) -> Json<BatcherStats> {
    Json(state.batcher.stats())
}

pub fn batcher_routes() -> Router<AppState> {
    Router::new().route("/api/batcher/status", get(batcher_status))
}
