//! Server startup utilities.

use hearth_config::AppConfig;
use tracing::info;

/// Prints the startup banner.
pub fn print_banner() {
    info!(
        r#"
    __                    __  __
   / /_  ___  ____ ______/ /_/ /_
  / __ \/ _ \/ __ `/ ___/ __/ __ \
 / / / /  __/ /_/ / /  / /_/ / / /
/_/ /_/\___/\__,_/_/   \__/_/ /_/
    "#
    );
}

/// Prints where the server listens and how caching is set up.
pub fn print_startup_info(config: &AppConfig) {
    let separator = "=".repeat(60);
    let base = format!("http://{}", config.server.addr());
    info!("{}", separator);
    info!("Health:     {}/health", base);
    info!("Readiness:  {}/ready", base);
    info!("API:        {}/api/v1", base);
    if config.server.admin_enabled {
        info!("Admin:      {}/admin", base);
    }
    info!(
        "Rate limit: {} requests / {:?} ({:?})",
        config.rate_limit.limit,
        config.rate_limit.window(),
        config.rate_limit.algorithm
    );
    info!("{}", separator);
}
