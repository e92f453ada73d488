//! Application wiring.
//!
//! One [`StoreConnection`] is built per process and handed to every
//! component through the cache facade.

use axum::Router;
use hearth_cache::{ConnectionState, SafeCache, StoreConnection};
use hearth_config::AppConfig;
use hearth_core::{HearthError, HearthResult};
use hearth_rest::{create_router, AppState};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Fully wired application.
pub struct App {
    config: AppConfig,
    connection: Arc<StoreConnection>,
    state: AppState,
}

impl App {
    /// Builds every component from configuration. Does not connect.
    pub fn new(config: AppConfig) -> Self {
        let connection = Arc::new(StoreConnection::new(&config.redis));
        let cache = SafeCache::new(Arc::clone(&connection), &config.cache);
        let state = AppState::new(cache, &config);
        Self {
            config,
            connection,
            state,
        }
    }

    /// Loaded configuration.
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Shared store connection.
    pub const fn connection(&self) -> &Arc<StoreConnection> {
        &self.connection
    }

    /// Shared handler state.
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// HTTP router with no application routes of its own.
    pub fn router(&self) -> Router {
        create_router(self.state.clone(), &self.config.server, Router::new())
    }

    /// Pings the store once so startup logs show whether caching works.
    /// The result is informational only.
    pub async fn check_store(&self) -> ConnectionState {
        if let Some(reason) = self.connection.disabled_reason() {
            info!(reason = %reason, "Running without cache");
        } else if self.connection.is_available().await {
            info!("Store reachable, caching enabled");
        } else {
            warn!("Store unreachable, serving uncached until it recovers");
        }
        self.connection.state().await
    }

    /// Serves HTTP until `shutdown` resolves, then releases the store
    /// connection.
    pub async fn serve<F>(self, shutdown: F) -> HearthResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.server.addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| HearthError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        info!("Listening on http://{}", addr);

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| HearthError::Internal(format!("HTTP server error: {}", e)));

        self.connection.close().await;
        info!("Server shutdown complete");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use hearth_core::UnavailableReason;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_runs_without_store() {
        let app = App::new(AppConfig::default());
        assert_eq!(
            app.check_store().await,
            ConnectionState::Disabled(UnavailableReason::Unconfigured)
        );
        assert!(!app.state().cache.is_enabled());

        let request = Request::builder().uri("/ready").body(Body::empty()).unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_serve_closes_connection_on_shutdown() {
        let mut config = AppConfig::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.redis.url = Some("redis://127.0.0.1:1".to_string());

        let app = App::new(config);
        let connection = Arc::clone(app.connection());
        assert_eq!(connection.state().await, ConnectionState::Idle);

        app.serve(async {}).await.unwrap();
        assert_eq!(connection.state().await, ConnectionState::Closed);
    }
}
