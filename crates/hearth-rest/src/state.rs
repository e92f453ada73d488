//! Application state for Axum handlers.

use crate::middleware::HttpCacheState;
use hearth_cache::{CacheInvalidator, RateLimiter, SafeCache};
use hearth_config::AppConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub cache: SafeCache,
    pub invalidator: CacheInvalidator,
    pub rate_limiter: RateLimiter,
    pub http_cache: HttpCacheState,
}

impl AppState {
    /// Wires every component over one cache facade.
    pub fn new(cache: SafeCache, config: &AppConfig) -> Self {
        Self {
            invalidator: CacheInvalidator::new(cache.clone()),
            rate_limiter: RateLimiter::new(&cache, &config.rate_limit),
            http_cache: HttpCacheState::new(cache.clone(), &config.cache),
            cache,
        }
    }
}
