//! Configuration loader with layered sources.

use crate::AppConfig;
use config::{Config, ConfigError, Environment, File};
use hearth_core::HearthError;
use std::path::Path;
use tracing::{debug, info, warn};

/// Plain environment variable naming the store address.
pub const REDIS_URL_ENV: &str = "REDIS_URL";

/// Environment variable marking a build or offline phase.
pub const BUILD_PHASE_ENV: &str = "HEARTH_BUILD_PHASE";

/// Configuration loader with layered sources.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config: AppConfig,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides
    /// 4. `REDIS_URL` - Store address, when no prefixed variable names one
    /// 5. Environment variables with `HEARTH__` prefix
    pub fn new(config_dir: impl AsRef<str>) -> Result<Self, HearthError> {
        let config = Self::load_config(config_dir.as_ref())?;
        Ok(Self { config })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, HearthError> {
        Self::new("./config")
    }

    /// Returns the loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Consumes the loader, returning the configuration.
    #[must_use]
    pub fn into_config(self) -> AppConfig {
        self.config
    }

    /// Loads configuration from the specified directory.
    fn load_config(config_dir: &str) -> Result<AppConfig, HearthError> {
        // Load .env file if present
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var("HEARTH_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = format!("{}/{}.toml", config_dir, name);
            if Path::new(&path).exists() {
                debug!("Loading config from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        if std::env::var("HEARTH__REDIS__URL").is_err() {
            if let Ok(url) = std::env::var(REDIS_URL_ENV) {
                builder = builder
                    .set_override("redis.url", url)
                    .map_err(config_error_to_hearth_error)?;
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("HEARTH")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error_to_hearth_error)?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .map_err(config_error_to_hearth_error)?;

        if build_phase_from_env() {
            app_config.redis.offline = true;
        }

        validate_config(&app_config)?;

        Ok(app_config)
    }
}

/// Validates the configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), HearthError> {
    if config.cache.scan_batch_size == 0 {
        return Err(HearthError::configuration("cache.scan_batch_size must be greater than zero"));
    }

    if config.server.admin_enabled
        && config.server.admin_token.as_deref().map_or(true, str::is_empty)
    {
        return Err(HearthError::configuration(
            "server.admin_token is required when server.admin_enabled is set",
        ));
    }

    if config.rate_limit.limit == 0 {
        return Err(HearthError::configuration("rate_limit.limit must be greater than zero"));
    }

    if config.rate_limit.window_ms == 0 {
        return Err(HearthError::configuration("rate_limit.window_ms must be greater than zero"));
    }

    if config.redis.url().is_none() {
        warn!("No store address configured; running without caching");
    } else if config.redis.offline {
        info!("Build phase detected; the store will not be contacted");
    }

    Ok(())
}

fn build_phase_from_env() -> bool {
    std::env::var(BUILD_PHASE_ENV)
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn config_error_to_hearth_error(err: ConfigError) -> HearthError {
    HearthError::Configuration(err.to_string())
}
