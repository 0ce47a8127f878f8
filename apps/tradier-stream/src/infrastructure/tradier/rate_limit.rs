//! Token Bucket Rate Limiter
//!
//! Client-side request pacing for the REST API. The bucket starts full,
//! refills continuously at a fixed rate, and never holds more than its
//! capacity.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Continuous-refill token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// A zero or negative `refill_per_second` disables limiting.
    #[must_use]
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_second,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Whether this bucket actually limits.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.refill_per_second > 0.0 && self.refill_per_second.is_finite()
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        self.reserve().is_none()
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        while let Some(wait) = self.reserve() {
            tracing::debug!(wait_ms = wait.as_millis(), "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available.
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Take a token, or return how long until one is available.
    fn reserve(&self) -> Option<Duration> {
        if !self.is_enabled() {
            return None;
        }

        let mut state = self.state.lock();
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return None;
        }

        let missing = 1.0 - state.tokens;
        Some(
            Duration::try_from_secs_f64(missing / self.refill_per_second)
                .unwrap_or(Duration::MAX),
        )
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if self.is_enabled() {
            state.tokens = elapsed
                .mul_add(self.refill_per_second, state.tokens)
                .min(self.capacity);
        }
        state.last_refill = now;
    }
}
