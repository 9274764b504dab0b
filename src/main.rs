mod domain;
mod infrastructure;
mod presentation;

use anyhow::Context;
use clap::Parser;
use domain::settings::SettingsService;
use infrastructure::bluetooth::{BtleAdapter, DeviceRegistry};
use infrastructure::logging::init_logger;
use presentation::server::GatewayServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Gate and garage bots behind a WebSocket gateway
#[derive(Parser, Debug)]
#[command(name = "bot-gateway", version, about)]
struct Cli {
    /// Configuration file (defaults to ./config.json, then the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings_service =
        SettingsService::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(level) = cli.log_level {
        settings_service.get_mut().log_settings.level = level;
    }
    let settings = settings_service.get().clone();

    let _logging_guard = init_logger(&settings.log_settings)?;
    info!("Starting bot gateway");
    info!("Configuration loaded from {}", settings_service.path().display());

    if settings.server.auth_token.is_empty() {
        warn!("authToken is empty, routes /ws and /mono are open to anyone");
    }

    let adapter = Arc::new(BtleAdapter::new().await?);
    let registry = Arc::new(DeviceRegistry::from_settings(adapter, &settings)?);
    registry.start().await.context("starting Bluetooth")?;

    let server = GatewayServer::new(Arc::clone(&registry), &settings)?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = &result {
                error!("Server stopped: {:#}", e);
            }
            registry.shutdown().await;
            result
        }
        _ = shutdown_signal() => {
            info!("Shutting down");
            registry.shutdown().await;
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl-C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
