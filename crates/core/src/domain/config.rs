//! Configuration management for maxxctl
//!
//! This module provides:
//! - Configuration structs for the device connection, the auto-ampenable
//!   engine and logging
//! - TOML serialization with async load/save
//! - A config manager resolving the default config file location

use crate::domain::decode::{SignalDecoder, DEFAULT_SILENCE_LEVEL_DB};
use crate::domain::reconcile::ReconcileConfig;
use crate::domain::stream::SupervisorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// WebSocket path of the level stream
pub const LEVEL_PATH: &str = "/socket/level";

/// WebSocket path of the datapoll stream
pub const DATAPOLL_PATH: &str = "/socket/datapoll";

/// Upper bound for every configured duration (one year)
pub const MAX_DURATION_MS: u64 = 365 * 24 * 3600 * 1000;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Device connection settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Amplifier address, `host` or `host:port`
    #[serde(default)]
    pub address: String,

    /// Token for the REST API
    #[serde(default)]
    pub token: String,
}

/// Auto-ampenable engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoAmpenableConfig {
    /// Channels whose averaged level is at or below this are silent (dB)
    pub silence_level_db: f64,

    /// Hold time before muting
    pub hold_time_ms: u64,

    /// Minimum spacing between stream dial attempts
    pub reconnect_interval_ms: u64,

    /// Minimum spacing between commands per channel
    pub command_interval_ms: u64,

    /// Minimum spacing between hold-time log lines per channel
    pub hold_log_interval_ms: u64,

    /// Periodic re-evaluation interval (0 = only on snapshot arrival)
    pub reevaluate_interval_ms: u64,

    /// Stop the engine on undecodable messages instead of skipping them
    pub strict_decoding: bool,
}

impl Default for AutoAmpenableConfig {
    fn default() -> Self {
        Self {
            silence_level_db: DEFAULT_SILENCE_LEVEL_DB,
            hold_time_ms: 60_000,
            reconnect_interval_ms: 1000,
            command_interval_ms: 1000,
            hold_log_interval_ms: 10_000,
            reevaluate_interval_ms: 0,
            strict_decoding: false,
        }
    }
}

impl AutoAmpenableConfig {
    pub fn hold_time(&self) -> Duration {
        Duration::from_millis(self.hold_time_ms)
    }

    pub fn reevaluate_interval(&self) -> Option<Duration> {
        (self.reevaluate_interval_ms > 0).then(|| Duration::from_millis(self.reevaluate_interval_ms))
    }

    pub fn signal_decoder(&self) -> SignalDecoder {
        SignalDecoder::new(self.silence_level_db)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            strict_decoding: self.strict_decoding,
        }
    }

    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            hold_time: self.hold_time(),
            command_interval: Duration::from_millis(self.command_interval_ms),
            hold_log_interval: Duration::from_millis(self.hold_log_interval_ms),
            reevaluate_interval: self.reevaluate_interval(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Invalid(format!("Unknown log format: {other}"))),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Complete maxxctl configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaxxConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub auto_ampenable: AutoAmpenableConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MaxxConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Check that the configuration can drive the engine
    pub fn validate(&self) -> Result<()> {
        if self.device.address.trim().is_empty() {
            return Err(ConfigError::Invalid("device address is required".to_string()));
        }

        let engine = &self.auto_ampenable;
        if !engine.silence_level_db.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "silence level must be finite, got {}",
                engine.silence_level_db
            )));
        }

        for (name, value) in [
            ("reconnect_interval_ms", engine.reconnect_interval_ms),
            ("command_interval_ms", engine.command_interval_ms),
            ("hold_log_interval_ms", engine.hold_log_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }

        for (name, value) in [
            ("hold_time_ms", engine.hold_time_ms),
            ("reconnect_interval_ms", engine.reconnect_interval_ms),
            ("command_interval_ms", engine.command_interval_ms),
            ("hold_log_interval_ms", engine.hold_log_interval_ms),
            ("reevaluate_interval_ms", engine.reevaluate_interval_ms),
        ] {
            if value > MAX_DURATION_MS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {MAX_DURATION_MS}, got {value}"
                )));
            }
        }

        if self.device.token.is_empty() {
            warn!("No REST API token configured, commands will likely be rejected");
        }

        Ok(())
    }
}

/// Configuration manager for the main maxxctl config file
///
/// Manages `<config dir>/maxxctl/config.toml`.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a manager for an explicit config file path
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Create a manager for the default config file path
    pub fn with_default_path() -> Result<Self> {
        Ok(Self::new(Self::default_config_dir()?.join("config.toml")))
    }

    /// Returns `~/.config/maxxctl` on Linux, the platform equivalent elsewhere
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("maxxctl"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Check if config file exists
    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }

    /// Load the config file, or defaults if it does not exist
    ///
    /// Unlike a missing file, an unreadable or corrupt file is an error.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<MaxxConfig> {
        if !self.exists() {
            debug!(
                path = %self.config_path.display(),
                "Config file not found, using defaults"
            );
            return Ok(MaxxConfig::default());
        }

        MaxxConfig::load_from_file(&self.config_path).await
    }

    /// Write `config`, refusing to overwrite an existing file unless `force`
    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &MaxxConfig, force: bool) -> Result<()> {
        if self.exists() && !force {
            return Err(ConfigError::Invalid(format!(
                "{} already exists",
                self.config_path.display()
            )));
        }

        config.save_to_file(&self.config_path).await
    }
}
