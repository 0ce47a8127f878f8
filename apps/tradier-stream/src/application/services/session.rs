//! Session Manager
//!
//! Creates and renews streaming sessions through one HTTP POST each.
//!
//! # Endpoints
//!
//! - Market data: `POST /v1/markets/events/session`
//! - Account events: `POST /v1/accounts/events/session`
//!
//! # Response Shapes
//!
//! ```json
//! {"stream": {"url": "wss://ws.tradier.com/v1/markets/events", "sessionid": "c8638963-..."}}
//! {"url": "wss://ws.tradier.com/v1/markets/events", "sessionid": "c8638963-..."}
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::application::ports::{HttpMethod, HttpTransport};
use crate::domain::session::{DEFAULT_SESSION_TTL, SessionKind, StreamSession};
use crate::error::{StreamError, StreamResult};

/// Market session endpoint.
pub const MARKET_SESSION_PATH: &str = "/v1/markets/events/session";

/// Account session endpoint.
pub const ACCOUNT_SESSION_PATH: &str = "/v1/accounts/events/session";

/// Session manager settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Client-side lifetime stamped on new sessions. The server does not
    /// report one.
    pub ttl: Duration,
    /// Renew proactively when a session expires within this margin.
    pub renew_margin: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SESSION_TTL,
            renew_margin: Duration::from_secs(5 * 60),
        }
    }
}

/// Creates and renews streaming sessions.
pub struct SessionManager {
    http: Arc<dyn HttpTransport>,
    settings: SessionSettings,
}

impl SessionManager {
    /// Create a session manager over an HTTP transport.
    #[must_use]
    pub fn new(http: Arc<dyn HttpTransport>, settings: SessionSettings) -> Self {
        Self { http, settings }
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Create a market data session.
    ///
    /// # Errors
    ///
    /// - `Network` if no HTTP response was obtained
    /// - `Api` for a non-2xx status
    /// - `Parse` if the body is not the expected shape
    pub async fn create_market_session(&self) -> StreamResult<StreamSession> {
        self.create_session(SessionKind::Market).await
    }

    /// Create an account events session.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_market_session`].
    pub async fn create_account_session(&self) -> StreamResult<StreamSession> {
        self.create_session(SessionKind::Account).await
    }

    /// Replace `session` with a freshly created one of the same kind.
    ///
    /// The kind is inferred from the session URL. On error `session` is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_market_session`].
    pub async fn renew_session(&self, session: &mut StreamSession) -> StreamResult<()> {
        let kind = session.kind();
        tracing::info!(kind = kind.as_str(), "Renewing streaming session");
        *session = self.create_session(kind).await?;
        Ok(())
    }

    /// Renew `session` if it expires within the configured margin.
    ///
    /// Returns `true` if a renewal happened.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_market_session`].
    pub async fn renew_if_expiring(&self, session: &mut StreamSession) -> StreamResult<bool> {
        if !session.expires_within(self.settings.renew_margin) {
            return Ok(false);
        }
        self.renew_session(session).await?;
        Ok(true)
    }

    async fn create_session(&self, kind: SessionKind) -> StreamResult<StreamSession> {
        let path = match kind {
            SessionKind::Market => MARKET_SESSION_PATH,
            SessionKind::Account => ACCOUNT_SESSION_PATH,
        };

        let response = self.http.perform(HttpMethod::Post, path, &[]).await?;

        if !response.is_success() {
            tracing::warn!(
                kind = kind.as_str(),
                status = response.status,
                "Session creation rejected"
            );
            return Err(StreamError::Api {
                status: response.status,
                message: response.body,
            });
        }

        let session = parse_session_body(&response.body, self.settings.ttl)?;
        tracing::info!(
            kind = kind.as_str(),
            url = %session.url(),
            active = session.is_active(),
            expires_at = %session.expires_at(),
            "Streaming session created"
        );
        Ok(session)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Parse a session-creation body, nested or flattened.
///
/// Both `url` and `sessionid` must be present as strings; empty values
/// produce an inactive session rather than an error.
///
/// # Errors
///
/// Returns `Parse` for invalid JSON or missing fields.
pub fn parse_session_body(body: &str, ttl: Duration) -> StreamResult<StreamSession> {
    let value: Value = serde_json::from_str(body)?;
    let stream = value.get("stream").filter(|v| v.is_object()).unwrap_or(&value);

    let url = stream
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| StreamError::Parse("session response missing 'url'".to_string()))?;
    let session_id = stream
        .get("sessionid")
        .and_then(Value::as_str)
        .ok_or_else(|| StreamError::Parse("session response missing 'sessionid'".to_string()))?;

    Ok(StreamSession::with_ttl(url, session_id, ttl))
}
