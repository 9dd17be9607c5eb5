//! Log subscriber setup

use anyhow::{Context, Result};
use maxxctl_core::domain::config::{LogFormat, LoggingConfig};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber; `RUST_LOG` takes precedence over `level`
pub fn init(config: &LoggingConfig) -> Result<()> {
    let level: LevelFilter = config
        .level
        .parse()
        .with_context(|| format!("Unknown log level: {}", config.level))?;

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|e| anyhow::anyhow!(e))
}
