//! Error Reporter
//!
//! Routes every error that happens after a connection exists (parse errors,
//! handler failures, heartbeat failures, send failures) to the caller's error
//! handler, the statistics counters and the metrics facade. Nothing here ever
//! propagates back into the receive or heartbeat loops.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::statistics::StreamStatistics;
use crate::error::StreamError;
use crate::infrastructure::metrics;

/// Caller-supplied error callback.
pub type ErrorHandler = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// Shared error sink.
pub struct ErrorReporter {
    handler: RwLock<Option<ErrorHandler>>,
    stats: Arc<StreamStatistics>,
}

impl ErrorReporter {
    /// Create a reporter counting into `stats`.
    #[must_use]
    pub fn new(stats: Arc<StreamStatistics>) -> Self {
        Self {
            handler: RwLock::new(None),
            stats,
        }
    }

    /// Install the error handler, replacing any previous one.
    pub fn set_handler(&self, handler: ErrorHandler) {
        *self.handler.write() = Some(handler);
    }

    /// Remove the error handler. Errors are still counted.
    pub fn clear_handler(&self) {
        *self.handler.write() = None;
    }

    /// Count `error` and hand it to the handler, if any.
    ///
    /// A panicking handler is contained here.
    pub fn report(&self, error: &StreamError) {
        self.stats.record_error();
        metrics::record_error(error.label());
        tracing::warn!(error = %error, error_type = error.label(), "Stream error");

        let handler = self.handler.read().clone();
        if let Some(handler) = handler
            && catch_unwind(AssertUnwindSafe(|| handler(error))).is_err()
        {
            tracing::error!("Error handler panicked");
        }
    }
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("has_handler", &self.handler.read().is_some())
            .finish_non_exhaustive()
    }
}
