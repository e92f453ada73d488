//! # Hearth Server
//!
//! Loads configuration, initialises logging, wires the cache and rate
//! limiter over a single store connection and serves the HTTP router until
//! interrupted.

use hearth_config::ConfigLoader;
use hearth_core::{init_logging, HearthResult, LoggingConfig};
use hearth_server::{app::App, startup};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Application error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> HearthResult<()> {
    let config = match ConfigLoader::from_default_location() {
        Ok(loader) => loader.into_config(),
        Err(e) => {
            // Make sure the failure is logged somewhere
            let _ = init_logging(&LoggingConfig::default());
            return Err(e);
        }
    };
    init_logging(&config.observability)?;

    startup::print_banner();
    info!("Starting Hearth server...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    let app = App::new(config);
    app.check_store().await;
    startup::print_startup_info(app.config());

    app.serve(shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
