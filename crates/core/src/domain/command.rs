//! Outbound enable/disable commands
//!
//! The reconciliation engine writes ampenable state through a
//! [`CommandSink`]. Implementations live in the `infra` crate.

use crate::domain::channel::ChannelIndex;
use async_trait::async_trait;
use thiserror::Error;

/// Transport-level failure while issuing a command
#[derive(Debug, Error)]
pub enum CommandError {
    /// The request could not be sent or no response was received
    #[error("transport error: {0}")]
    Transport(String),

    /// The command endpoint could not be built
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

pub type Result<T> = std::result::Result<T, CommandError>;

/// Response to a command that reached the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatus {
    pub status_code: u16,
    pub body: String,
}

impl CommandStatus {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200, String::new())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Capability to write a channel's ampenable state
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Enable or disable the amplifier output of `channel`
    ///
    /// A non-success status is returned as a value; only transport failures
    /// are errors.
    async fn set_channel_enabled(&self, channel: ChannelIndex, enabled: bool) -> Result<CommandStatus>;
}
