//! Reconnect Backoff
//!
//! Delay schedule for `StreamingClient::reconnect_with_backoff`. Attempt `n`
//! waits `initial * multiplier^(n-1)`, capped at `max_delay`, then spread by
//! a symmetric random jitter.

use std::time::Duration;

use rand::Rng;

use crate::error::StreamError;
use crate::infrastructure::config::StreamingConfig;

/// Ceiling applied when the configured delay is below it.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay, before jitter.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempt limit; 0 means unlimited.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Backoff derived from the streaming settings.
    ///
    /// `reconnect_delay` seeds the schedule and the ceiling never sits below
    /// it.
    #[must_use]
    pub fn from_streaming_config(config: &StreamingConfig) -> Self {
        Self {
            initial_delay: config.reconnect_delay,
            max_delay: DEFAULT_MAX_DELAY.max(config.reconnect_delay),
            max_attempts: config.max_reconnect_attempts,
            ..Self::default()
        }
    }

    /// Un-jittered delay for 1-based `attempt`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let ceiling = self.max_delay.as_secs_f64();

        if scaled.is_finite() && scaled >= 0.0 {
            Duration::from_secs_f64(scaled.min(ceiling))
        } else {
            self.max_delay
        }
    }
}

/// Attempt counter over a [`ReconnectConfig`].
///
/// ```rust
/// use tradier_stream::infrastructure::tradier::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig {
///     max_attempts: 2,
///     ..ReconnectConfig::default()
/// });
/// assert!(policy.next_delay().is_some());
/// assert!(policy.next_delay().is_some());
/// assert!(policy.next_delay().is_none());
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Fresh policy with no attempts made.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the limit is reached.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempts += 1;
        Some(self.jittered(self.config.base_delay(self.attempts)))
    }

    /// Attempts handed out so far.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempts < self.config.max_attempts
    }

    /// Start over after a successful connection.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = rand::rng().random_range(-factor..=factor);
        Duration::from_secs_f64((delay.as_secs_f64() * (1.0 + spread)).max(0.001))
    }
}

/// Why a bounded reconnect loop stopped without a connection.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// Every allowed attempt failed.
    #[error("maximum reconnection attempts ({attempts}) exceeded: {last_error}")]
    MaxAttemptsExceeded {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: StreamError,
    },
    /// Stopped by the caller before a connection was made.
    #[error("reconnection cancelled")]
    Cancelled,
}
