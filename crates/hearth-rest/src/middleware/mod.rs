//! HTTP middleware.

pub mod admin_auth;
pub mod http_cache;
pub mod logging;
pub mod rate_limit;

pub use admin_auth::{require_admin_token, AdminAuthState};
pub use http_cache::{etag_cache_middleware, http_cache_middleware, HttpCacheState};
pub use logging::logging_middleware;
pub use rate_limit::{client_id, rate_limit_middleware};
