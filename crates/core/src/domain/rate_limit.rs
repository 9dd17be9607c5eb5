//! Token bucket rate limiter
//!
//! Implemented as a generic cell rate algorithm: the bucket is tracked as a
//! single "theoretical arrival time", which keeps all arithmetic on
//! `Instant`/`Duration` and avoids fractional token drift.
//!
//! The limiter is owned by exactly one task, so methods take `&mut self`.

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Longest interval the limiter tracks; larger values are clamped so instant
/// arithmetic cannot overflow
pub const MAX_INTERVAL: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Returned by [`RateLimiter::wait`] when the cancellation token fires first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limiter wait cancelled")]
pub struct Cancelled;

/// Token bucket with `burst` capacity, refilling one token per `interval`
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    burst: u32,
    tat: Instant,
}

impl RateLimiter {
    /// Create a full bucket. A zero interval disables limiting.
    pub fn new(interval: Duration, burst: u32) -> Self {
        Self::new_at(interval, burst, Instant::now())
    }

    /// Capacity-1 limiter: at most one success per `interval`
    pub fn every(interval: Duration) -> Self {
        Self::new(interval, 1)
    }

    pub fn new_at(interval: Duration, burst: u32, now: Instant) -> Self {
        Self {
            interval: interval.min(MAX_INTERVAL),
            burst: burst.max(1),
            tat: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Consume a token if one is available, without blocking
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    pub fn allow_at(&mut self, now: Instant) -> bool {
        if self.interval.is_zero() {
            return true;
        }

        let next = self.tat.max(now) + self.interval;
        if next > now + self.window() {
            return false;
        }

        self.tat = next;
        true
    }

    /// Time until a token becomes available (zero if one is available now)
    pub fn delay_at(&self, now: Instant) -> Duration {
        if self.interval.is_zero() {
            return Duration::ZERO;
        }

        let next = self.tat.max(now) + self.interval;
        next.duration_since(now).saturating_sub(self.window())
    }

    /// Suspend until a token is available, then consume it
    ///
    /// Fails with [`Cancelled`] if `cancel` fires first; no token is consumed
    /// in that case.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let now = Instant::now();
        let delay = self.delay_at(now);
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep_until(now + delay) => {}
            }
        }

        let granted = self.allow_at(Instant::now());
        debug_assert!(granted, "token must be available after waiting");
        Ok(())
    }

    fn window(&self) -> Duration {
        self.interval.saturating_mul(self.burst).min(MAX_INTERVAL)
    }
}
