//! Stream Statistics
//!
//! Monotonic counters written by the dispatch path and the supervisor, read
//! as one consistent snapshot. All fields share a single narrow lock so a
//! reader never sees `messages_processed` ahead of `messages_received`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    /// Inbound messages seen by the dispatcher.
    pub messages_received: u64,
    /// Messages delivered to a handler without error.
    pub messages_processed: u64,
    /// Parse errors, callback failures and heartbeat failures.
    pub errors: u64,
    /// Completed reconnects.
    pub reconnects: u64,
    /// When the current connection was opened.
    pub connection_start: Option<DateTime<Utc>>,
    /// When the last inbound message arrived.
    pub last_message: Option<DateTime<Utc>>,
}

impl StatisticsSnapshot {
    /// Messages received but not delivered.
    #[must_use]
    pub const fn messages_dropped(&self) -> u64 {
        self.messages_received.saturating_sub(self.messages_processed)
    }

    /// Time since the connection opened.
    #[must_use]
    pub fn uptime(&self) -> Option<chrono::Duration> {
        self.connection_start.map(|start| Utc::now() - start)
    }
}

/// Shared statistics recorder.
#[derive(Debug, Default)]
pub struct StreamStatistics {
    inner: Mutex<StatisticsSnapshot>,
}

impl StreamStatistics {
    /// Create zeroed statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an inbound message.
    pub fn record_received(&self) {
        let mut inner = self.inner.lock();
        inner.messages_received += 1;
        inner.last_message = Some(Utc::now());
    }

    /// Count a delivered message.
    pub fn record_processed(&self) {
        self.inner.lock().messages_processed += 1;
    }

    /// Count an error.
    pub fn record_error(&self) {
        self.inner.lock().errors += 1;
    }

    /// Count a completed reconnect.
    pub fn record_reconnect(&self) {
        self.inner.lock().reconnects += 1;
    }

    /// Stamp the start of a new connection.
    pub fn mark_connected(&self) {
        self.inner.lock().connection_start = Some(Utc::now());
    }

    /// Consistent copy of every field.
    #[must_use]
    pub fn snapshot(&self) -> StatisticsSnapshot {
        self.inner.lock().clone()
    }

    /// Zero all counters and timestamps.
    pub fn reset(&self) {
        *self.inner.lock() = StatisticsSnapshot::default();
    }
}
