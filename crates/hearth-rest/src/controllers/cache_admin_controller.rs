//! Cache administration controller.
//!
//! Store statistics, manual invalidation and rate limit overrides. Mounted
//! only when `server.admin_enabled` is set, behind the admin token.

use crate::responses::ApiResponse;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use hearth_cache::{StoreStats, RateLimitDecision};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Outcome of an invalidation.
#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidationResult {
    /// Keys removed.
    pub deleted: u64,
}

/// Outcome of a flush or reset.
#[derive(Debug, Serialize, Deserialize)]
pub struct Acknowledged {
    pub ok: bool,
}

#[derive(Debug, Deserialize)]
pub struct BookingQuery {
    pub user_id: String,
    pub listing_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReviewQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitQuery {
    pub client: String,
    pub resource: String,
    pub limit: Option<u32>,
}

/// Creates the admin router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cache/stats", get(cache_stats))
        .route("/cache/invalidate/listings/:id", post(invalidate_listing))
        .route("/cache/invalidate/users/:id", post(invalidate_user))
        .route("/cache/invalidate/bookings/:id", post(invalidate_booking))
        .route("/cache/invalidate/reviews/:listing_id", post(invalidate_reviews))
        .route("/cache/invalidate/references/:id", post(invalidate_references))
        .route("/cache/invalidate/search", post(invalidate_search))
        .route("/cache/invalidate/amenities", post(invalidate_amenities))
        .route("/cache/flush", post(flush))
        .route("/rate-limit", get(rate_limit_info).delete(rate_limit_reset))
}

async fn cache_stats(State(state): State<AppState>) -> Json<ApiResponse<StoreStats>> {
    Json(ApiResponse::success(state.cache.stats().await))
}

fn deleted(deleted: u64) -> Json<ApiResponse<InvalidationResult>> {
    Json(ApiResponse::success(InvalidationResult { deleted }))
}

async fn invalidate_listing(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    deleted(state.invalidator.listing(&id).await)
}

async fn invalidate_user(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    deleted(state.invalidator.user(&id).await)
}

async fn invalidate_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BookingQuery>,
) -> impl IntoResponse {
    deleted(
        state
            .invalidator
            .booking(&id, &query.user_id, &query.listing_id)
            .await,
    )
}

async fn invalidate_reviews(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
    Query(query): Query<ReviewQuery>,
) -> impl IntoResponse {
    deleted(
        state
            .invalidator
            .review(&listing_id, query.user_id.as_deref())
            .await,
    )
}

async fn invalidate_references(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    deleted(state.invalidator.referencing(&id).await)
}

async fn invalidate_search(State(state): State<AppState>) -> impl IntoResponse {
    deleted(state.invalidator.search().await)
}

async fn invalidate_amenities(State(state): State<AppState>) -> impl IntoResponse {
    deleted(state.invalidator.amenities().await)
}

async fn flush(State(state): State<AppState>) -> impl IntoResponse {
    info!("Cache flush requested");
    Json(ApiResponse::success(Acknowledged {
        ok: state.invalidator.all().await,
    }))
}

async fn rate_limit_info(
    State(state): State<AppState>,
    Query(query): Query<RateLimitQuery>,
) -> Json<ApiResponse<RateLimitDecision>> {
    let limit = query
        .limit
        .unwrap_or(state.rate_limiter.default_policy().limit);
    let decision = state
        .rate_limiter
        .info(&query.client, &query.resource, limit)
        .await;
    Json(ApiResponse::success(decision))
}

async fn rate_limit_reset(
    State(state): State<AppState>,
    Query(query): Query<RateLimitQuery>,
) -> impl IntoResponse {
    info!(client = %query.client, resource = %query.resource, "Rate limit reset requested");
    Json(ApiResponse::success(Acknowledged {
        ok: state.rate_limiter.reset(&query.client, &query.resource).await,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use hearth_cache::{keys, MemoryBackend, SafeCache};
    use hearth_config::{AppConfig, CacheConfig};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn setup() -> (Arc<MemoryBackend>, AppState, axum::Router) {
        let backend = Arc::new(MemoryBackend::new());
        let cache = SafeCache::from_backend(backend.clone(), &CacheConfig::default());
        let state = AppState::new(cache, &AppConfig::default());
        let app = router().with_state(state.clone());
        (backend, state, app)
    }

    async fn call(app: axum::Router, method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_cache_stats() {
        let (_, state, app) = setup();
        state.cache.set(&keys::listing(1), &1, None).await;

        let (status, json) = call(app, Method::GET, "/cache/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["keyCount"], 1);
    }

    #[tokio::test]
    async fn test_invalidate_listing() {
        let (backend, state, app) = setup();
        state.cache.set(&keys::listing("42"), &"cabin", None).await;
        state.cache.set(&keys::reviews("42"), &Vec::<u32>::new(), None).await;
        state.cache.set(&keys::listing("43"), &"lodge", None).await;

        let (status, json) = call(app, Method::POST, "/cache/invalidate/listings/42").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["deleted"], 2);
        assert_eq!(backend.keys(), vec![keys::listing("43")]);
    }

    #[tokio::test]
    async fn test_invalidate_booking_requires_ids() {
        let (_, state, app) = setup();
        state.cache.set(&keys::user_bookings("u1"), &1, None).await;

        let (status, _) = call(app.clone(), Method::POST, "/cache/invalidate/bookings/b1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = call(
            app,
            Method::POST,
            "/cache/invalidate/bookings/b1?user_id=u1&listing_id=l1",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["deleted"], 1);
    }

    #[tokio::test]
    async fn test_flush() {
        let (backend, state, app) = setup();
        state.cache.set("a", &1, None).await;

        let (status, json) = call(app, Method::POST, "/cache/flush").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["ok"], true);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_info_and_reset() {
        let (_, state, app) = setup();
        state
            .rate_limiter
            .check_default("10.0.0.1", "/api/v1/listings")
            .await;

        let uri = "/rate-limit?client=10.0.0.1&resource=/api/v1/listings&limit=5";
        let (status, json) = call(app.clone(), Method::GET, uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["remaining"], 4);

        let (status, json) = call(app.clone(), Method::DELETE, uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["ok"], true);

        let (_, json) = call(app, Method::GET, uri).await;
        assert_eq!(json["data"]["remaining"], 5);
    }
}
