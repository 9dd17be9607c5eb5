//! Supervised message streams with automatic reconnect
//!
//! A [`StreamSupervisor`] keeps one logical connection to a
//! [`MessageSource`] alive. A relay task dials, reads framed messages and
//! redials after failures (rate limited); the supervisor hands each message
//! to a [`MessageHandler`] in receipt order until cancelled or the handler
//! fails fatally.

use crate::domain::decode::DecodeError;
use crate::domain::rate_limit::RateLimiter;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Errors raised by message sources and handlers
#[derive(Debug, Error)]
pub enum StreamError {
    /// Dialing the endpoint failed
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// Reading from an open connection failed
    #[error("read error: {0}")]
    Read(String),

    /// The peer closed the connection
    #[error("connection closed by peer")]
    Closed,

    /// A message could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The handler cannot continue
    #[error("handler error: {0}")]
    Handler(String),
}

impl StreamError {
    /// Whether the supervisor keeps going after this error
    ///
    /// Connection failures are retried. Decode failures skip the message
    /// unless `strict_decoding` is set.
    pub fn is_recoverable(&self, strict_decoding: bool) -> bool {
        match self {
            StreamError::Connect { .. } | StreamError::Read(_) | StreamError::Closed => true,
            StreamError::Decode(_) => !strict_decoding,
            StreamError::Handler(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// Stream of raw framed messages from one connection
pub type MessageStream = BoxStream<'static, Result<Vec<u8>>>;

/// Something that can be dialed to obtain a [`MessageStream`]
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Human-readable endpoint, used in logs and errors
    fn endpoint(&self) -> &str;

    /// Open a new connection
    async fn connect(&self) -> Result<MessageStream>;
}

/// Consumer of raw messages
#[async_trait]
pub trait MessageHandler: Send {
    async fn handle(&mut self, message: Vec<u8>) -> Result<()>;
}

/// Reconnect and error policy for a supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Minimum spacing between dial attempts
    pub reconnect_interval: Duration,

    /// Treat decode errors as fatal instead of skipping the message
    pub strict_decoding: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(1),
            strict_decoding: false,
        }
    }
}

pub struct StreamSupervisor {
    source: Arc<dyn MessageSource>,
    config: SupervisorConfig,
}

impl StreamSupervisor {
    pub fn new(source: Arc<dyn MessageSource>, config: SupervisorConfig) -> Self {
        Self { source, config }
    }

    pub fn endpoint(&self) -> &str {
        self.source.endpoint()
    }

    /// Deliver messages to `handler` until `cancel` fires
    ///
    /// Connection failures are logged and retried. Returns `Ok(())` on
    /// cancellation and `Err` only when the handler fails fatally, in which
    /// case no reconnect is attempted.
    #[instrument(skip_all, fields(endpoint = %self.source.endpoint()))]
    pub async fn run<H>(&self, handler: &mut H, cancel: &CancellationToken) -> Result<()>
    where
        H: MessageHandler + ?Sized,
    {
        let scope = cancel.child_token();
        let _guard = scope.clone().drop_guard();

        let (tx, mut rx) = mpsc::channel(1);
        tokio::spawn(relay(
            self.source.clone(),
            self.config.reconnect_interval,
            tx,
            scope.clone(),
        ));

        loop {
            let message = tokio::select! {
                biased;
                _ = scope.cancelled() => return Ok(()),
                message = rx.recv() => message,
            };

            // The relay only stops once the scope is cancelled
            let Some(message) = message else {
                return Ok(());
            };

            let result = tokio::select! {
                biased;
                _ = scope.cancelled() => return Ok(()),
                result = handler.handle(message) => result,
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_recoverable(self.config.strict_decoding) => {
                    warn!(
                        endpoint = %self.source.endpoint(),
                        error = %e,
                        "Skipping message that could not be handled."
                    );
                }
                Err(e) => {
                    error!(
                        endpoint = %self.source.endpoint(),
                        error = %e,
                        "Fatal error caught while handling message."
                    );
                    return Err(e);
                }
            }
        }
    }
}

/// Dial, read and redial until cancelled
async fn relay(
    source: Arc<dyn MessageSource>,
    reconnect_interval: Duration,
    tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut limiter = RateLimiter::every(reconnect_interval);

    loop {
        if limiter.wait(&cancel).await.is_err() {
            debug!(endpoint = %source.endpoint(), "Reconnect wait cancelled");
            return;
        }

        match stream_messages(source.as_ref(), &tx, &cancel).await {
            Ok(()) => {
                info!(endpoint = %source.endpoint(), "Closing stream");
                return;
            }
            Err(e) => {
                warn!(
                    endpoint = %source.endpoint(),
                    error = %e,
                    "Non-fatal error caught while streaming messages."
                );
            }
        }
    }
}

/// Forward messages from a single connection
///
/// Returns `Ok(())` when cancelled or when the consumer is gone, and an
/// error when the connection fails or ends.
async fn stream_messages(
    source: &dyn MessageSource,
    tx: &mpsc::Sender<Vec<u8>>,
    cancel: &CancellationToken,
) -> Result<()> {
    info!(endpoint = %source.endpoint(), "Connecting");

    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        stream = source.connect() => stream?,
    };

    debug!(endpoint = %source.endpoint(), "Connected");

    loop {
        // Reserve the slot before reading so at most one message waits
        // behind the one being handled
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => return Ok(()),
            },
        };

        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            message = stream.next() => message,
        };

        match message {
            Some(Ok(message)) => permit.send(message),
            Some(Err(e)) => return Err(e),
            None => return Err(StreamError::Closed),
        }
    }
}
