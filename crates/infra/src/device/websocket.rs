//! WebSocket message source
//!
//! The amplifier publishes telemetry on plain `ws://` endpoints. Each text or
//! binary frame is one JSON message.

use super::normalize_address;
use async_trait::async_trait;
use futures_util::StreamExt;
use maxxctl_core::domain::config::{DATAPOLL_PATH, LEVEL_PATH};
use maxxctl_core::domain::stream::{MessageSource, MessageStream, Result, StreamError};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Dials one WebSocket endpoint per connection attempt
#[derive(Debug, Clone)]
pub struct WebSocketSource {
    url: String,
}

impl WebSocketSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Endpoint `path` on the device at `address`
    pub fn for_device(address: &str, path: &str) -> Self {
        Self::new(format!("ws://{}{}", normalize_address(address), path))
    }

    /// The per-channel level stream
    pub fn level(address: &str) -> Self {
        Self::for_device(address, LEVEL_PATH)
    }

    /// The settings/status datapoll stream
    pub fn datapoll(address: &str) -> Self {
        Self::for_device(address, DATAPOLL_PATH)
    }
}

#[async_trait]
impl MessageSource for WebSocketSource {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<MessageStream> {
        let (ws, response) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| StreamError::Connect {
                    endpoint: self.url.clone(),
                    reason: e.to_string(),
                })?;

        debug!(endpoint = %self.url, status = %response.status(), "WebSocket handshake complete");

        Ok(ws.filter_map(|frame| async move { into_message(frame) }).boxed())
    }
}

/// Map a WebSocket frame to a raw message, skipping control frames
fn into_message(
    frame: std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<Vec<u8>>> {
    match frame {
        Ok(Message::Text(text)) => Some(Ok(text.into_bytes())),
        Ok(Message::Binary(data)) => Some(Ok(data)),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
        Ok(Message::Close(_)) => Some(Err(StreamError::Closed)),
        Err(e) => Some(Err(StreamError::Read(e.to_string()))),
    }
}
