//! maxxctl CLI Application

mod args;
mod logging;

use anyhow::{Context, Result};
use args::{Cli, Command, ConfigCommand};
use clap::Parser;
use maxxctl_core::domain::config::{ConfigManager, MaxxConfig};
use maxxctl_core::domain::service::AutoAmpenable;
use maxxctl_infra::device::{RestCommandSink, WebSocketSource};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = match &cli.config {
        Some(path) => ConfigManager::new(path.clone()),
        None => ConfigManager::with_default_path()?,
    };

    let mut config = manager
        .load()
        .await
        .with_context(|| format!("Failed to load {}", manager.config_path().display()))?;
    cli.apply(&mut config);

    match &cli.command {
        Command::AutoAmpenable(args) => {
            args.apply(&mut config);
            logging::init(&config.logging)?;
            auto_ampenable(config).await
        }
        Command::Config(ConfigCommand::Show) => {
            if !config.device.token.is_empty() {
                config.device.token = "<redacted>".to_string();
            }
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Config(ConfigCommand::Init { force }) => {
            logging::init(&config.logging)?;
            let defaults = MaxxConfig {
                device: config.device,
                ..MaxxConfig::default()
            };
            manager.save(&defaults, *force).await?;
            info!(path = %manager.config_path().display(), "Wrote config file");
            Ok(())
        }
    }
}

async fn auto_ampenable(config: MaxxConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let address = config.device.address.as_str();
    let engine = &config.auto_ampenable;
    info!(
        address,
        silence_level = engine.silence_level_db,
        hold_time = ?engine.hold_time(),
        token = !config.device.token.is_empty(),
        "Starting"
    );

    let sink = RestCommandSink::new(address, config.device.token.clone())
        .context("Failed to create REST client")?;
    let service = AutoAmpenable::new(
        Arc::new(WebSocketSource::level(address)),
        Arc::new(WebSocketSource::datapoll(address)),
        Arc::new(sink),
        engine,
    );

    let cancel = CancellationToken::new();
    let run = service.run(cancel.clone());
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result.context("Auto-ampenable stopped"),
        _ = shutdown_signal() => cancel.cancel(),
    }

    run.await.context("Auto-ampenable failed during shutdown")?;
    info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT (Ctrl-C) or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl-C), shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}
