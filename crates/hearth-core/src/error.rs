//! Unified error types for the caching and rate-limiting layer.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Why the external store cannot be used at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// No store address is configured.
    Unconfigured,
    /// The process runs in a build or offline phase.
    BuildPhase,
    /// The configured address could not be parsed.
    InvalidAddress,
    /// The connection handle was released.
    Closed,
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Unconfigured => "no store address configured",
            Self::BuildPhase => "build or offline phase",
            Self::InvalidAddress => "invalid store address",
            Self::Closed => "connection closed",
        };
        f.write_str(text)
    }
}

/// Unified error type for Hearth.
///
/// Errors never cross the public cache, invalidation or rate-limit API:
/// they are produced by backend operations and converted to safe defaults
/// one layer up. They do surface from configuration loading and startup.
#[derive(Error, Debug)]
pub enum HearthError {
    // ============ Store Errors ============
    /// The store cannot be used (unconfigured, build phase, closed).
    #[error("Store unavailable: {0}")]
    Unavailable(UnavailableReason),

    /// Connecting to the store failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An individual store command failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// A store command or connect attempt exceeded its timeout.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A cached value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ============ Configuration Errors ============
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ============ Rate Limiting ============
    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HearthError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::RateLimitExceeded => 429,
            Self::Unavailable(_) | Self::Connection(_) | Self::Timeout(_) => 503,
            Self::Cache(_)
            | Self::Serialization(_)
            | Self::Configuration(_)
            | Self::Internal(_)
            | Self::Other(_) => 500,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "STORE_UNAVAILABLE",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a cache command error.
    #[must_use]
    pub fn cache<T: Into<String>>(message: T) -> Self {
        Self::Cache(message.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks whether the failure concerns the connection itself rather
    /// than a single command, meaning the handle should be dropped.
    #[must_use]
    pub const fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Serializable error response for API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    /// Creates a new error response from a `HearthError`.
    #[must_use]
    pub fn from_error(error: &HearthError) -> Self {
        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<&HearthError> for ErrorResponse {
    fn from(error: &HearthError) -> Self {
        Self::from_error(error)
    }
}
