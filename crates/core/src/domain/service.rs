//! Automatic ampenable service
//!
//! Wires two [`StreamSupervisor`]s (level and datapoll) to one
//! [`Reconciler`] and runs them under a shared cancellation scope. Whichever
//! task exits first cancels the others, so a failed stream never leaves the
//! engine actuating on half-stale data.

use crate::domain::channel::{EnableSnapshot, SignalSnapshot};
use crate::domain::command::CommandSink;
use crate::domain::config::AutoAmpenableConfig;
use crate::domain::decode::{decode_enable, SignalDecoder};
use crate::domain::reconcile::{ReconcileConfig, Reconciler};
use crate::domain::stream::{
    MessageHandler, MessageSource, Result as StreamResult, StreamError, StreamSupervisor,
    SupervisorConfig,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Fatal service failures
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("stream {endpoint} failed: {source}")]
    Stream {
        endpoint: String,
        #[source]
        source: StreamError,
    },

    #[error("task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Decodes level messages and forwards signal snapshots to the engine
pub struct SignalForwarder {
    decoder: SignalDecoder,
    tx: mpsc::Sender<SignalSnapshot>,
}

impl SignalForwarder {
    pub fn new(decoder: SignalDecoder, tx: mpsc::Sender<SignalSnapshot>) -> Self {
        Self { decoder, tx }
    }
}

#[async_trait]
impl MessageHandler for SignalForwarder {
    async fn handle(&mut self, message: Vec<u8>) -> StreamResult<()> {
        let snapshot = self.decoder.decode(&message)?;
        self.tx
            .send(snapshot)
            .await
            .map_err(|_| StreamError::Handler("reconciler stopped receiving signals".to_string()))
    }
}

/// Extracts ampenable state from datapoll messages and forwards it to the engine
pub struct EnableForwarder {
    tx: mpsc::Sender<EnableSnapshot>,
}

impl EnableForwarder {
    pub fn new(tx: mpsc::Sender<EnableSnapshot>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl MessageHandler for EnableForwarder {
    async fn handle(&mut self, message: Vec<u8>) -> StreamResult<()> {
        let Some(snapshot) = decode_enable(&message)? else {
            return Ok(());
        };

        self.tx.send(snapshot).await.map_err(|_| {
            StreamError::Handler("reconciler stopped receiving ampenable states".to_string())
        })
    }
}

/// The complete auto-ampenable pipeline
pub struct AutoAmpenable {
    signal_source: Arc<dyn MessageSource>,
    enable_source: Arc<dyn MessageSource>,
    sink: Arc<dyn CommandSink>,
    decoder: SignalDecoder,
    supervisor: SupervisorConfig,
    reconcile: ReconcileConfig,
}

impl AutoAmpenable {
    pub fn new(
        signal_source: Arc<dyn MessageSource>,
        enable_source: Arc<dyn MessageSource>,
        sink: Arc<dyn CommandSink>,
        config: &AutoAmpenableConfig,
    ) -> Self {
        Self {
            signal_source,
            enable_source,
            sink,
            decoder: config.signal_decoder(),
            supervisor: config.supervisor_config(),
            reconcile: config.reconcile_config(),
        }
    }

    /// Run until `cancel` fires or any task exits
    ///
    /// Returns the first fatal error observed, after all tasks have stopped.
    #[instrument(skip_all)]
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let scope = cancel.child_token();
        let (signals_tx, signals_rx) = mpsc::channel(1);
        let (enables_tx, enables_rx) = mpsc::channel(1);

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        let reconciler = Reconciler::new(self.reconcile, self.sink);
        let engine_scope = scope.clone();
        tasks.spawn(async move {
            let _guard = engine_scope.clone().drop_guard();
            reconciler.run(signals_rx, enables_rx, engine_scope).await;
            Ok(())
        });

        tasks.spawn(supervise(
            StreamSupervisor::new(self.signal_source, self.supervisor.clone()),
            SignalForwarder::new(self.decoder, signals_tx),
            scope.clone(),
        ));

        tasks.spawn(supervise(
            StreamSupervisor::new(self.enable_source, self.supervisor),
            EnableForwarder::new(enables_tx),
            scope.clone(),
        ));

        info!("Auto-ampenable started");

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| EngineError::Task(e.to_string())).and_then(|r| r);
            if let Err(e) = result {
                scope.cancel();
                first_error.get_or_insert(e);
            }
        }

        info!("Auto-ampenable stopped");
        first_error.map_or(Ok(()), Err)
    }
}

/// Run one supervisor, cancelling the shared scope when it exits
async fn supervise<H>(
    supervisor: StreamSupervisor,
    mut handler: H,
    cancel: CancellationToken,
) -> Result<()>
where
    H: MessageHandler + 'static,
{
    let _guard = cancel.clone().drop_guard();

    supervisor
        .run(&mut handler, &cancel)
        .await
        .map_err(|source| {
            error!(
                endpoint = %supervisor.endpoint(),
                error = %source,
                "Error caught while streaming."
            );
            EngineError::Stream {
                endpoint: supervisor.endpoint().to_string(),
                source,
            }
        })
}
