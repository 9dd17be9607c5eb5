//! Command-line arguments
//!
//! Every option also reads an `INNOSONIX_*` environment variable. Options
//! that are set override the config file.

use clap::{Args, Parser, Subcommand};
use maxxctl_core::domain::config::{LogFormat, MaxxConfig};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(name = "maxxctl")]
#[command(version, about = "Control Innosonix Maxx amplifiers", long_about = None)]
pub struct Cli {
    /// Config file (defaults to <config dir>/maxxctl/config.toml)
    #[arg(long, global = true, env = "INNOSONIX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Amplifier address
    #[arg(long, global = true, env = "INNOSONIX_ADDR")]
    pub addr: Option<String>,

    /// Token to use for the REST API calls
    #[arg(long, global = true, env = "INNOSONIX_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "INNOSONIX_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Logging format (text, json)
    #[arg(long, global = true, env = "INNOSONIX_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Automatically toggle ampenable for channels based on detected signals
    AutoAmpenable(AutoAmpenableArgs),

    /// Inspect or create the config file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Args)]
pub struct AutoAmpenableArgs {
    /// Silence level in dB
    #[arg(long, env = "INNOSONIX_SILENCE_LEVEL", allow_negative_numbers = true)]
    pub silence_level: Option<f64>,

    /// Hold time before muting (e.g. 90s, 2m)
    #[arg(long, env = "INNOSONIX_HOLD_TIME", value_parser = parse_duration)]
    pub hold_time: Option<Duration>,

    /// Also re-evaluate on this interval, not only when data arrives
    #[arg(long, env = "INNOSONIX_REEVALUATE_INTERVAL", value_parser = parse_duration)]
    pub reevaluate_interval: Option<Duration>,

    /// Stop on undecodable messages instead of skipping them
    #[arg(long, env = "INNOSONIX_STRICT_DECODING")]
    pub strict_decoding: bool,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Apply global overrides on top of `config`
    pub fn apply(&self, config: &mut MaxxConfig) {
        if let Some(addr) = &self.addr {
            config.device.address = addr.clone();
        }
        if let Some(token) = &self.token {
            config.device.token = token.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

impl AutoAmpenableArgs {
    pub fn apply(&self, config: &mut MaxxConfig) {
        let engine = &mut config.auto_ampenable;

        if let Some(level) = self.silence_level {
            engine.silence_level_db = level;
        }
        if let Some(hold_time) = self.hold_time {
            engine.hold_time_ms = millis(hold_time);
        }
        if let Some(interval) = self.reevaluate_interval {
            engine.reevaluate_interval_ms = millis(interval);
        }
        if self.strict_decoding {
            engine.strict_decoding = true;
        }
    }
}

/// Saturating, so oversized values are caught by config validation
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("invalid duration '{0}', expected e.g. 500ms, 10s, 2m, 1h")]
    Invalid(String),
}

/// Parse `500ms`, `10s`, `2m`, `1h` or a bare number of seconds
pub fn parse_duration(s: &str) -> Result<Duration, DurationError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: u64 = number
        .parse()
        .map_err(|_| DurationError::Invalid(s.to_string()))?;

    let multiplier = match unit.trim() {
        "ms" => return Ok(Duration::from_millis(value)),
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => return Err(DurationError::Invalid(s.to_string())),
    };

    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| DurationError::Invalid(s.to_string()))
}
