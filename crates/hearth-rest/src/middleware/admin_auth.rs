//! Admin authentication middleware.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Admin middleware state. Only the digest of the token is kept.
#[derive(Clone)]
pub struct AdminAuthState {
    token_digest: [u8; 32],
}

impl AdminAuthState {
    /// Creates the state for a shared admin token.
    pub fn new(token: &str) -> Self {
        Self {
            token_digest: Sha256::digest(token.as_bytes()).into(),
        }
    }

    /// Compares digests without stopping at the first differing byte.
    fn accepts(&self, token: &str) -> bool {
        let digest = Sha256::digest(token.as_bytes());
        digest
            .iter()
            .zip(self.token_digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for AdminAuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAuthState").finish_non_exhaustive()
    }
}

/// Middleware that requires the admin bearer token.
///
/// Returns 401 unless `Authorization: Bearer <token>` matches.
pub async fn require_admin_token(
    State(state): State<AdminAuthState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(token) if state.accepts(token) => Ok(next.run(request).await),
        _ => {
            debug!(path = %request.uri().path(), "Admin request rejected");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
