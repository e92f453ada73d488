//! Logging initialisation.
//!
//! Installs a `tracing` subscriber with an environment filter and either a
//! human-readable or a JSON formatter.

use crate::{HearthError, HearthResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, multi-field lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "info,hearth=debug,tower_http=debug".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more
/// than once returns an error from the second call on; callers at process
/// start can treat that as fatal, tests can ignore it.
pub fn init_logging(config: &LoggingConfig) -> HearthResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| HearthError::Configuration(format!("Invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.log_format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
    };

    result.map_err(|e| HearthError::Internal(format!("Failed to install subscriber: {}", e)))?;

    tracing::info!(format = ?config.log_format, "Logging initialized");
    Ok(())
}
