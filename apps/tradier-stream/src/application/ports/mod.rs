//! Port Interfaces
//!
//! Contracts the streaming core consumes from its collaborators. The
//! infrastructure layer provides the production adapters; tests substitute
//! in-memory doubles.
//!
//! ## Driven Ports (Outbound)
//!
//! - `HttpTransport`: one-shot REST calls (session creation)
//! - `DuplexConnection`: persistent bidirectional message channel

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StreamResult;

// =============================================================================
// HTTP Transport
// =============================================================================

/// HTTP method supported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// GET with query parameters.
    Get,
    /// POST with form-encoded parameters.
    Post,
    /// DELETE with query parameters.
    Delete,
}

impl HttpMethod {
    /// Method name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

/// Raw HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: String,
    /// Response headers, lowercase names.
    pub headers: HashMap<String, String>,
}

impl HttpResponse {
    /// Response with a status and body and no headers.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// One-shot HTTP capability.
///
/// Implementations own signing, retry and rate limiting. A non-2xx status is
/// a normal response, not an error; `Err` means no response was obtained.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform a request against `path` relative to the API base URL.
    async fn perform(
        &self,
        method: HttpMethod,
        path: &str,
        params: &[(String, String)],
    ) -> StreamResult<HttpResponse>;
}

// =============================================================================
// Duplex Connection
// =============================================================================

/// Callback receiving each inbound text message, in delivery order.
pub type MessageCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Where and how to open a streaming connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Streaming URL from the session.
    pub url: String,
    /// Session id from the session, sent as the `sessionid` query parameter.
    pub session_id: String,
    /// Bearer token; empty when none is configured.
    pub bearer_token: String,
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("url", &self.url)
            .field("session_id", &"[REDACTED]")
            .field("bearer_token", &"[REDACTED]")
            .finish()
    }
}

/// Persistent bidirectional message channel.
///
/// The connection delivers inbound text to the installed handler from its
/// own I/O task. It never interprets message contents.
#[async_trait]
pub trait DuplexConnection: Send + Sync {
    /// Install the inbound message handler, replacing any previous one.
    fn set_message_handler(&self, handler: MessageCallback);

    /// Remove the inbound message handler. Frames that arrive afterwards are
    /// discarded.
    fn clear_message_handler(&self);

    /// Open the connection.
    async fn connect(&self, target: &ConnectTarget) -> StreamResult<()>;

    /// Send one text frame.
    async fn send(&self, text: String) -> StreamResult<()>;

    /// Close the connection. Idempotent.
    async fn disconnect(&self);

    /// Whether the connection is open.
    fn is_connected(&self) -> bool;
}
