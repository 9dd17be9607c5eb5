//! REST command sink
//!
//! Writes ampenable state with
//! `PUT /rest-api/settings/channel/{id}/ampenable`, authenticated by a
//! `token` header.

use super::normalize_address;
use async_trait::async_trait;
use maxxctl_core::domain::channel::ChannelIndex;
use maxxctl_core::domain::command::{CommandError, CommandSink, CommandStatus, Result};
use reqwest::{Client, Url};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

const TOKEN_HEADER: &str = "token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct BoolValue {
    value: bool,
}

pub struct RestCommandSink {
    client: Client,
    base_url: Url,
    token: String,
}

impl RestCommandSink {
    /// Sink for the device at `address` (`host` or `host:port`)
    pub fn new(address: &str, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CommandError::Transport(e.to_string()))?;

        Self::with_client(client, address, token)
    }

    pub fn with_client(client: Client, address: &str, token: impl Into<String>) -> Result<Self> {
        let raw = format!("http://{}/rest-api/", normalize_address(address));
        let base_url = Url::parse(&raw)
            .map_err(|e| CommandError::InvalidEndpoint(format!("{raw}: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Ampenable URL for `channel`, using the 1-based device id
    pub fn ampenable_url(&self, channel: ChannelIndex) -> Result<Url> {
        self.base_url
            .join(&format!("settings/channel/{}/ampenable", channel.device_id()))
            .map_err(|e| CommandError::InvalidEndpoint(e.to_string()))
    }
}

impl fmt::Debug for RestCommandSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestCommandSink")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl CommandSink for RestCommandSink {
    #[instrument(skip(self), fields(channel = channel.device_id()))]
    async fn set_channel_enabled(&self, channel: ChannelIndex, enabled: bool) -> Result<CommandStatus> {
        let url = self.ampenable_url(channel)?;

        let response = self
            .client
            .put(url)
            .header(TOKEN_HEADER, &self.token)
            .json(&BoolValue { value: enabled })
            .send()
            .await
            .map_err(|e| CommandError::Transport(e.to_string()))?;

        let status_code = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CommandError::Transport(e.to_string()))?;

        debug!(status_code, "Ampenable request complete");
        Ok(CommandStatus::new(status_code, body))
    }
}
