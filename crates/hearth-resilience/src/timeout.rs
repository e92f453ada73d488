//! Timeout wrapper for store operations.

use hearth_core::HearthError;
use std::time::Duration;

/// Wraps an async operation with a timeout.
///
/// `operation` names the command in the resulting error so logs can tell a
/// slow `SCAN` from a slow `GET`.
pub async fn with_timeout<F, Fut, T>(
    duration: Duration,
    operation: &str,
    f: F,
) -> Result<T, HearthError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, HearthError>>,
{
    tokio::time::timeout(duration, f()).await.map_err(|_| {
        HearthError::Timeout(format!("{} timed out after {:?}", operation, duration))
    })?
}

/// Timeout configuration for store access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Bound on establishing the connection.
    pub connect_timeout: Duration,
    /// Bound on each individual command.
    pub command_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            command_timeout: Duration::from_secs(1),
        }
    }
}

impl TimeoutConfig {
    /// Creates a configuration from explicit bounds.
    #[must_use]
    pub const fn new(connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            command_timeout,
        }
    }
}
