//! Main application router.

use crate::{
    controllers::{cache_admin_controller, health_controller},
    middleware::{
        etag_cache_middleware, logging_middleware, rate_limit_middleware, require_admin_token,
        AdminAuthState,
    },
    state::AppState,
};
use axum::{middleware, routing::get, Router};
use hearth_config::ServerConfig;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Creates the main application router.
///
/// `api` holds the application's own routes. They are mounted under
/// `/api/v1` behind rate limiting and response caching with ETags. Health
/// endpoints are always mounted; admin endpoints only when enabled and an
/// admin token is configured.
pub fn create_router(state: AppState, server_config: &ServerConfig, api: Router<AppState>) -> Router {
    let cors = create_cors_layer(server_config);

    let api_router = api
        .layer(middleware::from_fn_with_state(
            state.http_cache.clone(),
            etag_cache_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .with_state(state.clone());

    let mut router = Router::new()
        // Health endpoints (never rate limited)
        .merge(health_controller::router().with_state(state.clone()))
        .nest("/api/v1", api_router)
        .route("/", get(root));

    if server_config.admin_enabled {
        match server_config.admin_token.as_deref().filter(|token| !token.is_empty()) {
            Some(token) => {
                let admin_router = cache_admin_controller::router()
                    .layer(middleware::from_fn_with_state(
                        AdminAuthState::new(token),
                        require_admin_token,
                    ))
                    .layer(middleware::from_fn_with_state(
                        state.rate_limiter.clone(),
                        rate_limit_middleware,
                    ))
                    .with_state(state);
                router = router.nest("/admin", admin_router);
                info!("Cache admin endpoints mounted at /admin");
            }
            None => warn!("Admin endpoints enabled without an admin token, not mounting"),
        }
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(logging_middleware))
}

/// Creates a CORS layer based on server configuration.
fn create_cors_layer(server_config: &ServerConfig) -> CorsLayer {
    if server_config.cors_enabled {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    }
}

/// Root endpoint handler.
async fn root() -> &'static str {
    "Hearth cache service"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        Json,
    };
    use hearth_cache::{MemoryBackend, SafeCache};
    use hearth_config::{AppConfig, CacheConfig};
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state() -> AppState {
        let backend = Arc::new(MemoryBackend::new());
        let cache = SafeCache::from_backend(backend, &CacheConfig::default());
        AppState::new(cache, &AppConfig::default())
    }

    fn api() -> Router<AppState> {
        Router::new().route("/listings", get(|| async { Json(json!([{ "id": 1 }])) }))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_api_routes_are_cached_and_limited() {
        let app = create_router(state(), &ServerConfig::default(), api());

        let first = app.clone().oneshot(get_request("/api/v1/listings")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["x-cache"], "MISS");
        assert_eq!(first.headers()["x-ratelimit-limit"], "100");
        assert!(first.headers().contains_key("etag"));

        let second = app.oneshot(get_request("/api/v1/listings")).await.unwrap();
        assert_eq!(second.headers()["x-cache"], "HIT");
        assert_eq!(second.headers()["x-ratelimit-remaining"], "98");
    }

    #[tokio::test]
    async fn test_health_is_not_rate_limited() {
        let app = create_router(state(), &ServerConfig::default(), api());
        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }

    fn admin_request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut request = Request::builder().method(Method::POST).uri(uri);
        if let Some(token) = token {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        request.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_admin_routes_are_opt_in() {
        let uri = "/admin/cache/invalidate/search";

        let app = create_router(state(), &ServerConfig::default(), api());
        let response = app.oneshot(admin_request(uri, Some("secret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let config = ServerConfig {
            admin_enabled: true,
            admin_token: Some("secret".to_string()),
            ..ServerConfig::default()
        };
        let app = create_router(state(), &config, api());
        let response = app.oneshot(admin_request(uri, Some("secret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_routes_require_the_token() {
        let config = ServerConfig {
            admin_enabled: true,
            admin_token: Some("secret".to_string()),
            ..ServerConfig::default()
        };
        let app = create_router(state(), &config, api());

        let uri = "/admin/cache/flush";
        let response = app.clone().oneshot(admin_request(uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app.clone().oneshot(admin_request(uri, Some("guess"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let stats = Request::builder()
            .uri("/admin/cache/stats")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(stats).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_without_token_is_not_mounted() {
        let config = ServerConfig {
            admin_enabled: true,
            ..ServerConfig::default()
        };
        let app = create_router(state(), &config, api());
        let response = app
            .oneshot(admin_request("/admin/cache/flush", Some("anything")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cache_stats_are_not_public() {
        let app = create_router(state(), &ServerConfig::default(), api());
        let response = app.oneshot(get_request("/cache/stats")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
