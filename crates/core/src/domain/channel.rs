//! Amplifier channel identifiers and per-channel snapshots
//!
//! The device reports channels positionally (0-based), while its REST API
//! addresses them by 1-based channel id. [`ChannelIndex`] carries the
//! position and converts to the device id at the boundary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Position of a channel in the device's channel arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelIndex(usize);

impl ChannelIndex {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }

    /// 1-based channel id used by the REST API
    pub fn device_id(&self) -> usize {
        self.0 + 1
    }
}

impl fmt::Display for ChannelIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}", self.device_id())
    }
}

/// Full per-channel boolean map for one metric
///
/// A snapshot always replaces the previous one wholesale; nothing is merged
/// field-by-field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStates {
    values: BTreeMap<ChannelIndex, bool>,
}

/// `hasSignal` per channel, as classified from the level stream
pub type SignalSnapshot = ChannelStates;

/// `isEnabled` (ampenable) per channel, as reported by the datapoll stream
pub type EnableSnapshot = ChannelStates;

impl ChannelStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dense snapshot where the position in `values` is the channel index
    pub fn from_dense<I>(values: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        Self {
            values: values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (ChannelIndex::new(i), v))
                .collect(),
        }
    }

    pub fn get(&self, channel: ChannelIndex) -> Option<bool> {
        self.values.get(&channel).copied()
    }

    pub fn set(&mut self, channel: ChannelIndex, value: bool) {
        self.values.insert(channel, value);
    }

    pub fn contains(&self, channel: ChannelIndex) -> bool {
        self.values.contains_key(&channel)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate in channel order
    pub fn iter(&self) -> impl Iterator<Item = (ChannelIndex, bool)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }
}

impl FromIterator<(ChannelIndex, bool)> for ChannelStates {
    fn from_iter<T: IntoIterator<Item = (ChannelIndex, bool)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
