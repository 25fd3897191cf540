//! nlm-fv library - Form view service
//!
//! Receives "form viewed" notifications from embedded subscription forms,
//! buffers them in the view batcher, and writes aggregated view counts and
//! per-referrer traffic to the forms table.

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod batcher;
pub mod config;
pub mod db;
pub mod error;
pub mod store;

pub use crate::error::{ApiError, ApiResult};

use batcher::ViewBatcher;
use store::FormStore;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub batcher: Arc<ViewBatcher>,
    /// Read side for the stats endpoint; the batcher holds its own handle
    pub store: Arc<dyn FormStore>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(batcher: Arc<ViewBatcher>, store: Arc<dyn FormStore>) -> Self {
        Self {
            batcher,
            store,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::form_routes())
        .merge(api::batcher_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
