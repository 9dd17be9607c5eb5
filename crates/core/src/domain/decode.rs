//! Snapshot decoders for the device's WebSocket telemetry
//!
//! Two message shapes are consumed:
//! - `/socket/level`: per-channel sub-band level readings, classified into a
//!   [`SignalSnapshot`]
//! - `/socket/datapoll`: a partial settings document, from which the
//!   per-channel ampenable state is extracted into an [`EnableSnapshot`]

use crate::domain::channel::{ChannelIndex, ChannelStates, EnableSnapshot, SignalSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default silence threshold in dB
pub const DEFAULT_SILENCE_LEVEL_DB: f64 = -100.0;

/// Errors raised while decoding a telemetry message
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing ampenable value for {channel}")]
    MissingAmpenable { channel: ChannelIndex },
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Message received from the level stream
///
/// The outer `level` index is the channel, the inner array holds sub-band
/// readings whose meaning is positional only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelMessage {
    #[serde(default)]
    pub level: Vec<Vec<f64>>,
    #[serde(default)]
    pub reduction: Vec<Vec<f64>>,
    #[serde(default)]
    pub psu: Option<f64>,
    #[serde(default)]
    pub thermo: Option<f64>,
}

/// Partial model of a datapoll message
///
/// `settings: None` and `settings.channel: None` both mean the message
/// carried no channel settings, which is not the same as an empty list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatapollMessage {
    #[serde(default)]
    pub settings: Option<DatapollSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatapollSettings {
    #[serde(default)]
    pub channel: Option<Vec<ChannelSettings>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSettings {
    #[serde(default)]
    pub ampenable: Option<BoolValue>,
}

/// `{ "value": bool }` wrapper used by the device for boolean settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolValue {
    #[serde(default)]
    pub value: Option<bool>,
}

impl BoolValue {
    pub fn new(value: bool) -> Self {
        Self { value: Some(value) }
    }
}

/// Classifies averaged sub-band levels into signal presence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalDecoder {
    silence_level_db: f64,
}

impl Default for SignalDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_SILENCE_LEVEL_DB)
    }
}

impl SignalDecoder {
    pub fn new(silence_level_db: f64) -> Self {
        Self { silence_level_db }
    }

    pub fn silence_level_db(&self) -> f64 {
        self.silence_level_db
    }

    /// Decode a raw level message into a full signal snapshot
    pub fn decode(&self, message: &[u8]) -> Result<SignalSnapshot> {
        let message: LevelMessage = serde_json::from_slice(message)?;
        Ok(self.classify(&message))
    }

    pub fn classify(&self, message: &LevelMessage) -> SignalSnapshot {
        ChannelStates::from_dense(
            message
                .level
                .iter()
                .map(|bands| has_signal(bands, self.silence_level_db)),
        )
    }
}

/// A channel has signal when the mean of its sub-band readings is above the
/// silence level. An empty reading list never has signal.
pub fn has_signal(bands: &[f64], silence_level_db: f64) -> bool {
    if bands.is_empty() {
        return false;
    }

    let mean = bands.iter().sum::<f64>() / bands.len() as f64;
    mean > silence_level_db
}

/// Decode a raw datapoll message into an enable snapshot
///
/// Returns `Ok(None)` when the message carries no channel settings, so the
/// caller keeps its cached snapshot.
pub fn decode_enable(message: &[u8]) -> Result<Option<EnableSnapshot>> {
    let message: DatapollMessage = serde_json::from_slice(message)?;
    extract_enable(&message)
}

pub fn extract_enable(message: &DatapollMessage) -> Result<Option<EnableSnapshot>> {
    let Some(channels) = message
        .settings
        .as_ref()
        .and_then(|settings| settings.channel.as_ref())
    else {
        return Ok(None);
    };

    channels
        .iter()
        .enumerate()
        .map(|(i, settings)| {
            let channel = ChannelIndex::new(i);
            settings
                .ampenable
                .and_then(|ampenable| ampenable.value)
                .map(|enabled| (channel, enabled))
                .ok_or(DecodeError::MissingAmpenable { channel })
        })
        .collect::<Result<EnableSnapshot>>()
        .map(Some)
}
