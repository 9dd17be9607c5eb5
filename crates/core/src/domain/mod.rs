//! Domain entities and business rules

pub mod channel;
pub mod command;
pub mod config;
pub mod decode;
pub mod rate_limit;
pub mod reconcile;
pub mod service;
pub mod stream;

// Re-export specific items to avoid ambiguous glob imports
pub use channel::{ChannelIndex, ChannelStates, EnableSnapshot, SignalSnapshot};
pub use command::{CommandError, CommandSink, CommandStatus};
pub use config::{
    AutoAmpenableConfig, ConfigError, ConfigManager, DeviceConfig, LogFormat, LoggingConfig,
    MaxxConfig, DATAPOLL_PATH, LEVEL_PATH,
};
pub use decode::{decode_enable, has_signal, DecodeError, SignalDecoder, DEFAULT_SILENCE_LEVEL_DB};
pub use rate_limit::{Cancelled, RateLimiter};
pub use reconcile::{ReconcileConfig, Reconciler};
pub use service::{AutoAmpenable, EngineError};
pub use stream::{
    MessageHandler, MessageSource, MessageStream, StreamError, StreamSupervisor, SupervisorConfig,
};
