//! HTTP request handlers.

use axum::{
    Json,
    extract::State,
    http::{Uri, header},
    response::IntoResponse,
};
use serde::Serialize;

use crate::hub::HubStats;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Current rule list, read straight from the store.
///
/// GET /
pub async fn list_rules(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state.rules.to_json()?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(flatten)]
    pub hub: HubStats,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let hub = state.hub.stats().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        hub,
    }))
}

pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(uri.path().to_string())
}
