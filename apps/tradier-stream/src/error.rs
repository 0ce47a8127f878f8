//! Streaming Error Taxonomy
//!
//! One error type is shared by the session manager, the transports and the
//! dispatch path. Session creation returns it to the caller; everything that
//! happens after a connection is open is delivered to the registered error
//! handler instead.

use thiserror::Error;

use crate::domain::streaming::EventKind;

/// Errors produced by the streaming core.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Transport-level failure (connect, send, HTTP I/O).
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx HTTP status from a session endpoint.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Malformed JSON or a response missing expected fields.
    #[error("parse error: {0}")]
    Parse(String),

    /// Caller supplied an unusable argument.
    #[error("validation error: {0}")]
    Validation(String),

    /// A user handler returned an error or panicked.
    #[error("{kind} handler failed: {message}")]
    Callback {
        /// Event kind whose handler failed.
        kind: EventKind,
        /// Error description.
        message: String,
    },
}

impl StreamError {
    /// Short label used for metrics and structured logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Api { .. } => "api",
            Self::Parse(_) => "parse",
            Self::Validation(_) => "validation",
            Self::Callback { .. } => "callback",
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Result alias for the streaming core.
pub type StreamResult<T> = Result<T, StreamError>;
