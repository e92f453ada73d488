//! Health check controller.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use hearth_core::UnavailableReason;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status.
    pub status: String,
    /// Application version.
    pub version: String,
}

/// Cache availability as reported by the readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheHealth {
    /// The store answers.
    Connected,
    /// The store is configured but not answering.
    Degraded,
    /// Caching is turned off.
    Disabled,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub cache: CacheHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnavailableReason>,
}

/// Creates the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
}

/// Health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check endpoint.
///
/// Always `200`: the service keeps working without its cache, so a missing
/// or failing store is reported but never makes the instance unready.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let cache = if !state.cache.is_enabled() {
        CacheHealth::Disabled
    } else if state.cache.is_available().await {
        CacheHealth::Connected
    } else {
        CacheHealth::Degraded
    };

    Json(ReadinessResponse {
        status: "ready".to_string(),
        cache,
        reason: state.cache.disabled_reason(),
    })
}

/// Liveness check endpoint.
pub async fn liveness_check() -> impl IntoResponse {
    StatusCode::OK
}
