use log::{error, info, warn};
use std::path::Path;
use tokio::signal;
use vigil::configuration::config::Configuration;
use vigil::controller::controller_handler::Controller;

#[tokio::main]
async fn main() {
    // Respect RUST_LOG for the overall level; keep the ORM quiet.
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("sea_orm", log::LevelFilter::Warn)
        .filter_module("sqlx", log::LevelFilter::Warn)
        .filter_module("sqlx::query", log::LevelFilter::Error)
        .format_target(false)
        .init();

    info!("vigil proctoring ingest v{} starting up", env!("CARGO_PKG_VERSION"));

    // A single positional argument is a TOML configuration file; anything
    // else is handled by the flag/env parser.
    let config = match std::env::args().nth(1) {
        Some(arg) if !arg.starts_with('-') => match Configuration::from_file(Path::new(&arg)) {
            Ok(config) => {
                info!("configuration loaded from {}", arg);
                config
            }
            Err(e) => {
                error!("failed to load configuration from {}: {}", arg, e);
                std::process::exit(1);
            }
        },
        _ => {
            let config = Configuration::from_args();
            if let Err(e) = config.validate() {
                error!("invalid configuration: {}", e);
                std::process::exit(1);
            }
            config
        }
    };

    let mut controller = match Controller::new(config).await {
        Ok(controller) => controller,
        Err(e) => {
            error!("failed to initialize controller: {}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run(shutdown_rx).await {
            error!("controller error: {}", e);
        }
    });

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("shutdown signal received, stopping...");
        }
        Err(e) => {
            error!("failed to listen for shutdown signal: {}", e);
        }
    }

    if let Err(e) = shutdown_tx.send(()) {
        error!("failed to send shutdown signal: {:?}", e);
    }

    match tokio::time::timeout(tokio::time::Duration::from_secs(10), controller_handle).await {
        Ok(Ok(())) => {
            info!("shutdown completed");
        }
        Ok(Err(e)) => {
            error!("controller task failed during shutdown: {:?}", e);
        }
        Err(_) => {
            warn!("controller shutdown timed out after 10 seconds");
        }
    }
}
