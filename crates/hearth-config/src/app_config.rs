//! Application configuration structures.

use hearth_core::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Key-value store connection configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Cache behaviour configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging configuration.
    #[serde(default)]
    pub observability: LoggingConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "hearth".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Enable CORS.
    pub cors_enabled: bool,
    /// Mount the cache and rate limit admin routes.
    pub admin_enabled: bool,
    /// Bearer token required by the admin routes. They stay unmounted
    /// without one.
    #[serde(skip_serializing)]
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_enabled: true,
            admin_enabled: false,
            admin_token: None,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Key-value store connection configuration.
///
/// A missing URL is a valid configuration: the application then runs
/// without caching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Store URL, e.g. `redis://localhost:6379`.
    pub url: Option<String>,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-command timeout in milliseconds.
    pub command_timeout_ms: u64,
    /// Build or offline phase: never connect.
    pub offline: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout_ms: 2_000,
            command_timeout_ms: 1_000,
            offline: false,
        }
    }
}

impl RedisConfig {
    /// Creates a configuration pointing at the given URL with default timeouts.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Returns the configured URL, treating blank values as absent.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Returns the connect timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the command timeout as a Duration.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Cache behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a write does not name one, in seconds.
    pub default_ttl_secs: u64,
    /// Keys requested per cursor step and deleted per batch.
    pub scan_batch_size: usize,
    /// Serialise concurrent fallbacks for the same key within this process.
    pub single_flight: bool,
    /// TTL of cached HTTP responses, in seconds.
    pub http_ttl_secs: u64,
    /// Largest response body the HTTP cache buffers. Bigger or unsized
    /// bodies are streamed through uncached.
    pub http_max_body_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3_600, // 1 hour
            scan_batch_size: 100,
            single_flight: true,
            http_ttl_secs: 300, // 5 minutes
            http_max_body_bytes: 1_048_576, // 1 MiB
        }
    }
}

impl CacheConfig {
    /// Returns the default TTL as a Duration.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Returns the HTTP response TTL as a Duration.
    #[must_use]
    pub const fn http_ttl(&self) -> Duration {
        Duration::from_secs(self.http_ttl_secs)
    }
}

/// Rate limiting algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    /// Counter per renewing time bucket. Cheap, allows up to twice the
    /// limit across a bucket boundary.
    #[default]
    FixedWindow,
    /// Timestamped log over a trailing window. Exact, one script per request.
    SlidingWindow,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Algorithm used by the default policy.
    pub algorithm: RateLimitAlgorithm,
    /// Requests admitted per window.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Enforce an in-process limit when the store is unavailable instead
    /// of admitting everything.
    pub local_fallback: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            algorithm: RateLimitAlgorithm::FixedWindow,
            limit: 100,
            window_ms: 60_000,
            local_fallback: false,
        }
    }
}

impl RateLimitConfig {
    /// Returns the window as a Duration.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}
