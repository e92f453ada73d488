//! HTTP response caching middleware.
//!
//! Caches successful GET responses under a key derived from the request
//! (method, path and query by default). Hits are served straight from the
//! cache with `X-Cache: HIT`; misses run the handler and are tagged
//! `X-Cache: MISS`. The ETag variant also answers `If-None-Match` with
//! `304 Not Modified`.
//!
//! Requests carrying credentials are never shared: they run the handler and
//! the response is marked private. Only sized bodies up to a configured limit
//! are buffered; streams and larger bodies pass through untouched.

use axum::{
    body::{to_bytes, Body, Bytes, HttpBody},
    extract::State,
    http::{
        header::{
            AUTHORIZATION, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LANGUAGE, CONTENT_LENGTH,
            CONTENT_TYPE, COOKIE, ETAG, IF_NONE_MATCH, LAST_MODIFIED, LINK, SET_COOKIE, VARY,
        },
        response::Parts,
        HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::stream;
use hearth_cache::{keys, SafeCache};
use hearth_config::CacheConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cache status header.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Prefix of the default response key.
pub const DEFAULT_KEY_PREFIX: &str = keys::HTTP_PREFIX;

/// Response headers stored and replayed besides `x-` extension headers.
const REPLAYED_HEADERS: [HeaderName; 5] =
    [CONTENT_TYPE, CONTENT_LANGUAGE, CONTENT_DISPOSITION, LINK, LAST_MODIFIED];

/// Computes a cache key for a request.
pub type CacheKeyFn = Arc<dyn Fn(&Request<Body>) -> String + Send + Sync>;

/// Decides whether a request bypasses the cache.
pub type SkipFn = Arc<dyn Fn(&Request<Body>) -> bool + Send + Sync>;

/// Options and cache handle for the response caching middleware.
#[derive(Clone)]
pub struct HttpCacheState {
    cache: SafeCache,
    ttl: Duration,
    max_body_bytes: usize,
    key_prefix: String,
    key_fn: Option<CacheKeyFn>,
    skip: Option<SkipFn>,
}

impl HttpCacheState {
    /// Creates caching options with the configured HTTP TTL.
    pub fn new(cache: SafeCache, config: &CacheConfig) -> Self {
        Self {
            cache,
            ttl: config.http_ttl(),
            max_body_bytes: config.http_max_body_bytes,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            key_fn: None,
            skip: None,
        }
    }

    /// Overrides the response TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Overrides the largest body that is buffered and cached.
    #[must_use]
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Overrides the prefix of the default key.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Replaces the default key with a caller-supplied one.
    #[must_use]
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Request<Body>) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    /// Lets matching requests bypass the cache.
    #[must_use]
    pub fn with_skip<F>(mut self, skip: F) -> Self
    where
        F: Fn(&Request<Body>) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(skip));
        self
    }

    /// Response TTL.
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cache key of a request.
    pub fn cache_key(&self, request: &Request<Body>) -> String {
        match &self.key_fn {
            Some(key_fn) => key_fn(request),
            None => keys::http_response(
                &self.key_prefix,
                request.method().as_str(),
                request.uri().path(),
                request.uri().query(),
            ),
        }
    }

    fn bypasses(&self, request: &Request<Body>) -> bool {
        request.method() != Method::GET || self.skip.as_ref().is_some_and(|skip| skip(request))
    }

    fn tag(&self, headers: &mut HeaderMap, status: &'static str, etag: Option<&str>) {
        headers.insert(X_CACHE, HeaderValue::from_static(status));
        if let Ok(value) = HeaderValue::try_from(format!("public, max-age={}", self.ttl.as_secs())) {
            headers.insert(CACHE_CONTROL, value);
        }
        headers.insert(VARY, vary_credentials());
        if let Some(value) = etag.and_then(|etag| HeaderValue::from_str(etag).ok()) {
            headers.insert(ETAG, value);
        }
    }
}

impl std::fmt::Debug for HttpCacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCacheState")
            .field("ttl", &self.ttl)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("key_prefix", &self.key_prefix)
            .field("custom_key", &self.key_fn.is_some())
            .field("skip", &self.skip.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedResponse {
    status: u16,
    #[serde(default)]
    headers: Vec<(String, String)>,
    body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
}

/// Caches successful GET responses.
pub async fn http_cache_middleware(
    State(state): State<HttpCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    serve(&state, request, next, false).await
}

/// Caches successful GET responses and answers conditional requests.
pub async fn etag_cache_middleware(
    State(state): State<HttpCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    serve(&state, request, next, true).await
}

async fn serve(state: &HttpCacheState, request: Request<Body>, next: Next, with_etag: bool) -> Response {
    if state.bypasses(&request) {
        return next.run(request).await;
    }

    if carries_credentials(request.headers()) {
        let mut response = next.run(request).await;
        let headers = response.headers_mut();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("private"));
        headers.insert(VARY, vary_credentials());
        return response;
    }

    let key = state.cache_key(&request);
    if let Some(cached) = state.cache.get::<CachedResponse>(&key).await {
        debug!(key = %key, "HTTP cache hit");
        let etag = cached.etag.as_deref().filter(|_| with_etag);
        if let Some(etag) = etag {
            if matches_etag(request.headers(), etag) {
                return not_modified(state, etag);
            }
        }
        return replay(state, &cached, etag);
    }

    let response = next.run(request).await;
    if !response.status().is_success() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    if !is_storable(&parts) {
        debug!(key = %key, "Response is not storable, not caching");
        return Response::from_parts(parts, body);
    }
    match body_len(&parts.headers, &body) {
        Some(len) if len <= state.max_body_bytes as u64 => {}
        _ => {
            debug!(key = %key, "Response body is unsized or too large, not caching");
            return Response::from_parts(parts, body);
        }
    }

    let bytes = match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to buffer response body");
            // Hand the failure to the server so the connection is aborted
            // the same way an unbuffered body would abort it
            let failed = stream::once(async move { Err::<Bytes, _>(e) });
            return Response::from_parts(parts, Body::from_stream(failed));
        }
    };

    let Ok(text) = std::str::from_utf8(&bytes) else {
        debug!(key = %key, "Response body is not UTF-8, not caching");
        return Response::from_parts(parts, Body::from(bytes));
    };

    let cached = CachedResponse {
        status: parts.status.as_u16(),
        headers: replayed_headers(&parts.headers),
        body: text.to_owned(),
        etag: with_etag.then(|| etag_for(&bytes)),
    };
    if state.cache.set(&key, &cached, Some(state.ttl)).await {
        debug!(key = %key, "HTTP response cached");
    }

    state.tag(&mut parts.headers, "MISS", cached.etag.as_deref());
    Response::from_parts(parts, Body::from(bytes))
}

fn vary_credentials() -> HeaderValue {
    HeaderValue::from_static("Authorization, Cookie")
}

fn carries_credentials(headers: &HeaderMap) -> bool {
    headers.contains_key(AUTHORIZATION) || headers.contains_key(COOKIE)
}

/// Responses that set cookies or stream events are never shared.
fn is_storable(parts: &Parts) -> bool {
    let event_stream = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"));
    !event_stream && !parts.headers.contains_key(SET_COOKIE)
}

/// Declared body length, from `Content-Length` or an exact size hint.
fn body_len(headers: &HeaderMap, body: &Body) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .or_else(|| body.size_hint().exact())
}

fn is_replayed(name: &HeaderName) -> bool {
    if REPLAYED_HEADERS.contains(name) {
        return true;
    }
    let name = name.as_str();
    name.starts_with("x-")
        && name != X_CACHE.as_str()
        && name != "x-request-id"
        && !name.starts_with("x-ratelimit-")
}

fn replayed_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| is_replayed(name))
        .filter_map(|(name, value)| Some((name.as_str().to_owned(), value.to_str().ok()?.to_owned())))
        .collect()
}

fn replay(state: &HttpCacheState, cached: &CachedResponse, etag: Option<&str>) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    let mut response = (status, cached.body.clone()).into_response();
    let headers = response.headers_mut();
    headers.remove(CONTENT_TYPE);
    for (name, value) in &cached.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            headers.append(name, value);
        }
    }
    state.tag(headers, "HIT", etag);
    response
}

fn not_modified(state: &HttpCacheState, etag: &str) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    state.tag(response.headers_mut(), "HIT", Some(etag));
    response
}

fn matches_etag(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
}

/// Strong entity tag of a body: the quoted hex of its SHA-256 prefix.
fn etag_for(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let mut tag = String::with_capacity(34);
    tag.push('"');
    for byte in &digest[..16] {
        let _ = write!(tag, "{byte:02x}");
    }
    tag.push('"');
    tag
}
