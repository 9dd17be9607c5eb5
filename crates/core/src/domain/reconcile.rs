//! Reconciliation engine for automatic ampenable control
//!
//! The engine caches the latest signal and enable snapshots and, on every
//! arrival, decides per channel whether the amplifier output should be
//! switched:
//!
//! - signal present on a disabled channel: enable immediately
//! - no signal on an enabled channel: disable once the channel has been
//!   silent for the configured hold time
//!
//! Command dispatch and hold-time logging are rate limited per channel. All
//! state is owned by the engine task, so nothing here is shared or locked.

use crate::domain::channel::{ChannelIndex, EnableSnapshot, SignalSnapshot};
use crate::domain::command::{CommandError, CommandSink};
use crate::domain::rate_limit::RateLimiter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Timing parameters for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// How long a channel must stay silent before it is disabled
    pub hold_time: Duration,

    /// Minimum spacing between commands for the same channel
    pub command_interval: Duration,

    /// Minimum spacing between "will mute after hold time" log lines per channel
    pub hold_log_interval: Duration,

    /// Reconcile on a timer as well as on snapshot arrival (None = arrival only)
    pub reevaluate_interval: Option<Duration>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            hold_time: Duration::from_secs(60),
            command_interval: Duration::from_secs(1),
            hold_log_interval: Duration::from_secs(10),
            reevaluate_interval: None,
        }
    }
}

/// Single-owner reconciliation state
pub struct Reconciler {
    config: ReconcileConfig,
    sink: Arc<dyn CommandSink>,
    signals: Option<SignalSnapshot>,
    enables: Option<EnableSnapshot>,
    silence_since: HashMap<ChannelIndex, Instant>,
    command_limiters: HashMap<ChannelIndex, RateLimiter>,
    hold_log_limiters: HashMap<ChannelIndex, RateLimiter>,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig, sink: Arc<dyn CommandSink>) -> Self {
        Self {
            config,
            sink,
            signals: None,
            enables: None,
            silence_since: HashMap::new(),
            command_limiters: HashMap::new(),
            hold_log_limiters: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Replace the cached signal snapshot
    pub fn update_signals(&mut self, snapshot: SignalSnapshot) {
        trace!(channels = snapshot.len(), "Signal snapshot received");
        self.signals = Some(snapshot);
    }

    /// Replace the cached enable snapshot
    pub fn update_enables(&mut self, snapshot: EnableSnapshot) {
        trace!(channels = snapshot.len(), "Ampenable snapshot received");
        self.enables = Some(snapshot);
    }

    pub fn signals(&self) -> Option<&SignalSnapshot> {
        self.signals.as_ref()
    }

    pub fn enables(&self) -> Option<&EnableSnapshot> {
        self.enables.as_ref()
    }

    /// Instant since which `channel` has been silent while enabled, if a mute is pending
    pub fn silence_since(&self, channel: ChannelIndex) -> Option<Instant> {
        self.silence_since.get(&channel).copied()
    }

    pub async fn reconcile(&mut self) -> Result<(), CommandError> {
        self.reconcile_at(Instant::now()).await
    }

    /// Run one reconciliation pass as of `now`
    ///
    /// A transport failure from the command sink aborts the pass; channels
    /// after the failing one are evaluated again on the next pass.
    pub async fn reconcile_at(&mut self, now: Instant) -> Result<(), CommandError> {
        let (Some(signals), Some(_)) = (&self.signals, &self.enables) else {
            debug!(
                signals = self.signals.as_ref().map_or(0, |s| s.len()),
                ampenableds = self.enables.as_ref().map_or(0, |s| s.len()),
                "Missing data"
            );
            return Ok(());
        };

        let channels: Vec<(ChannelIndex, bool)> = signals.iter().collect();

        // Channels missing from the latest signal snapshot no longer exist
        self.silence_since
            .retain(|channel, _| channels.iter().any(|(c, _)| c == channel));

        for (channel, has_signal) in channels {
            let is_enabled = self
                .enables
                .as_ref()
                .and_then(|enables| enables.get(channel))
                .unwrap_or(false);

            if has_signal == is_enabled {
                if self.silence_since.remove(&channel).is_some() && has_signal {
                    info!(
                        channel = channel.device_id(),
                        "Signal detected on channel, resetting hold time."
                    );
                }
                continue;
            }

            if !has_signal {
                let since = *self.silence_since.entry(channel).or_insert_with(|| {
                    info!(channel = channel.device_id(), "No signal detected on channel.");
                    now
                });

                // An unrepresentable deadline never expires
                let deadline = since.checked_add(self.config.hold_time);
                if deadline.map_or(true, |deadline| now < deadline) {
                    let interval = self.config.hold_log_interval;
                    let limiter = self
                        .hold_log_limiters
                        .entry(channel)
                        .or_insert_with(|| RateLimiter::new_at(interval, 1, now));
                    if limiter.allow_at(now) {
                        info!(
                            channel = channel.device_id(),
                            remaining_delay_ms = deadline
                                .map_or(u64::MAX, |d| d.duration_since(now).as_millis() as u64),
                            "No signal detected on channel, will mute after hold time."
                        );
                    }
                    continue;
                }
            } else if self.silence_since.remove(&channel).is_some() {
                info!(
                    channel = channel.device_id(),
                    "Signal detected on channel, resetting hold time."
                );
            }

            let interval = self.config.command_interval;
            let limiter = self
                .command_limiters
                .entry(channel)
                .or_insert_with(|| RateLimiter::new_at(interval, 1, now));
            if !limiter.allow_at(now) {
                trace!(channel = channel.device_id(), "Command rate limited");
                continue;
            }

            info!(
                channel = channel.device_id(),
                ampenable = has_signal,
                "Updating ampenable for channel."
            );

            let status = self.sink.set_channel_enabled(channel, has_signal).await?;
            if !status.is_success() {
                warn!(
                    channel = channel.device_id(),
                    ampenable = has_signal,
                    status_code = status.status_code,
                    body = %status.body,
                    "Unexpected status code received when updating ampenable for channel."
                );
                continue;
            }

            if let Some(enables) = self.enables.as_mut() {
                enables.set(channel, has_signal);
            }
            if !has_signal {
                self.silence_since.remove(&channel);
            }

            info!(
                channel = channel.device_id(),
                ampenable = has_signal,
                "Updated ampenable for channel."
            );
        }

        Ok(())
    }

    /// Consume snapshots until cancelled or both inputs close
    ///
    /// Every arrival replaces the matching cache and triggers one
    /// reconciliation pass. Command failures are logged and do not stop the
    /// loop. With a re-evaluation ticker the loop keeps reconciling the last
    /// snapshots after the inputs close, until cancelled.
    #[instrument(skip_all)]
    pub async fn run(
        mut self,
        mut signals: mpsc::Receiver<SignalSnapshot>,
        mut enables: mpsc::Receiver<EnableSnapshot>,
        cancel: CancellationToken,
    ) {
        let mut ticker = self.config.reevaluate_interval.map(|period| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        info!(
            hold_time_ms = self.config.hold_time.as_millis() as u64,
            reevaluate = ticker.is_some(),
            "Reconciler started"
        );

        let mut signals_open = true;
        let mut enables_open = true;

        loop {
            if !signals_open && !enables_open && ticker.is_none() {
                debug!("Snapshot inputs closed");
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                snapshot = signals.recv(), if signals_open => match snapshot {
                    Some(snapshot) => self.update_signals(snapshot),
                    None => {
                        signals_open = false;
                        continue;
                    }
                },
                snapshot = enables.recv(), if enables_open => match snapshot {
                    Some(snapshot) => self.update_enables(snapshot),
                    None => {
                        enables_open = false;
                        continue;
                    }
                },
                _ = next_tick(&mut ticker), if ticker.is_some() => {}
            }

            if let Err(e) = self.reconcile().await {
                warn!(error = %e, "Error caught while reconciling (non-fatal).");
            }
        }

        info!("Reconciler stopped");
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
