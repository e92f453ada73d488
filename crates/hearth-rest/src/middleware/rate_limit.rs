//! Rate limiting middleware.

use crate::responses::AppError;
use axum::{
    body::Body,
    extract::State,
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use hearth_cache::{RateLimitDecision, RateLimiter};
use hearth_core::HearthError;
use tracing::debug;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const ANONYMOUS: &str = "anonymous";

/// Resolves the client identifier of a request.
///
/// The first `X-Forwarded-For` hop wins, then `X-Real-IP`, then a shared
/// anonymous bucket.
pub fn client_id(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim);
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    forwarded
        .filter(|v| !v.is_empty())
        .or_else(|| real_ip.filter(|v| !v.is_empty()))
        .unwrap_or(ANONYMOUS)
        .to_string()
}

/// Rate limits requests per client and path with the limiter's default
/// policy.
///
/// Rejected requests get `429` with `Retry-After`. Every response carries the
/// `X-RateLimit-*` headers.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = client_id(request.headers());
    let resource = request.uri().path().to_string();
    let policy = *limiter.default_policy();

    let decision = limiter.check(&client, &resource, &policy).await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        debug!(client = %client, resource = %resource, "Request rate limited");
        let mut response = AppError(HearthError::RateLimitExceeded).into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs()));
        response
    };

    set_headers(response.headers_mut(), policy.limit, &decision);
    response
}

fn set_headers(headers: &mut HeaderMap, limit: u32, decision: &RateLimitDecision) {
    let reset_secs = decision.reset_at_epoch_ms.saturating_add(999) / 1_000;
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_secs));
}
