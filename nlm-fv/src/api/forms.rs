//! Form view notifications and view statistics

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::store::FormStats;
use crate::AppState;

/// Body of a view notification; every field optional
#[derive(Debug, Default, Deserialize)]
pub struct ViewRequest {
    pub referrer: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ViewResponse {
    pub success: bool,
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// POST /api/forms/:form_key/view
///
/// Queues the view and answers immediately; the response never waits for a
/// flush. A missing or unparseable body is treated as `{}`, and the
/// `Referer` header stands in for a missing body referrer.
pub async fn record_view(
    State(state): State<AppState>,
    Path(form_key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<ViewResponse> {
    let request = if body.is_empty() {
        ViewRequest::default()
    } else {
        serde_json::from_slice::<ViewRequest>(&body).unwrap_or_else(|e| {
            debug!(form_key = %form_key, error = %e, "Ignoring malformed view body");
            ViewRequest::default()
        })
    };

    let referrer = request
        .referrer
        .as_deref()
        .or_else(|| header_str(&headers, header::REFERER));
    let user_agent = header_str(&headers, header::USER_AGENT);

    state.batcher.record_view(&form_key, referrer, user_agent);

    Json(ViewResponse { success: true })
}

/// GET /api/forms/:form_key/stats
pub async fn form_stats(
    State(state): State<AppState>,
    Path(form_key): Path<String>,
) -> ApiResult<Json<FormStats>> {
    let form_key = form_key.trim();
    if form_key.is_empty() {
        return Err(ApiError::BadRequest("form key must not be empty".to_string()));
    }

    state
        .store
        .form_stats(form_key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("form '{}'", form_key)))
}

pub fn form_routes() -> Router<AppState> {
    Router::new()
        .route("/api/forms/:form_key/view", post(record_view))
        .route("/api/forms/:form_key/stats", get(form_stats))
}
