//! Streaming Session
//!
//! A server-issued URL + session id pair authorizing one streaming
//! connection. The server does not report an expiry, so the client stamps one
//! from a configurable TTL when the session is created.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Default client-side session lifetime.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(8 * 60 * 60);

/// Which streaming endpoint a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Market data (trades, quotes, summaries, timesales).
    Market,
    /// Account activity (orders, positions).
    Account,
}

impl SessionKind {
    /// Infer the kind from the streaming URL.
    ///
    /// Account streams live under an `/accounts/` path; everything else is
    /// treated as market data.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        if url.contains("/accounts/") || url.ends_with("/accounts") {
            Self::Account
        } else {
            Self::Market
        }
    }

    /// Name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Account => "account",
        }
    }
}

/// Streaming session handle.
#[derive(Clone, PartialEq, Eq)]
pub struct StreamSession {
    url: String,
    session_id: String,
    expires_at: DateTime<Utc>,
    is_active: bool,
}

impl StreamSession {
    /// Create a session. It is active iff both `url` and `session_id` are
    /// non-empty.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        session_id: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let url = url.into();
        let session_id = session_id.into();
        let is_active = !url.is_empty() && !session_id.is_empty();
        Self {
            url,
            session_id,
            expires_at,
            is_active,
        }
    }

    /// Create a session expiring `ttl` from now.
    #[must_use]
    pub fn with_ttl(url: impl Into<String>, session_id: impl Into<String>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(url, session_id, expires_at)
    }

    /// Streaming URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Server session id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Client-side expiry.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the session may be used to connect or subscribe.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    /// Endpoint this session belongs to.
    #[must_use]
    pub fn kind(&self) -> SessionKind {
        SessionKind::from_url(&self.url)
    }

    /// Whether the client-side expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whether the session expires within `margin`.
    #[must_use]
    pub fn expires_within(&self, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_add_signed(margin)
            .is_none_or(|deadline| deadline >= self.expires_at)
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("url", &self.url)
            .field("session_id", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("is_active", &self.is_active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_requires_url_and_id() {
        assert!(StreamSession::with_ttl("wss://x", "abc", DEFAULT_SESSION_TTL).is_active());
        assert!(!StreamSession::with_ttl("", "abc", DEFAULT_SESSION_TTL).is_active());
        assert!(!StreamSession::with_ttl("wss://x", "", DEFAULT_SESSION_TTL).is_active());
    }

    #[test]
    fn kind_from_url_shape() {
        assert_eq!(
            SessionKind::from_url("wss://ws.tradier.com/v1/markets/events"),
            SessionKind::Market
        );
        assert_eq!(
            SessionKind::from_url("wss://ws.tradier.com/v1/accounts/events"),
            SessionKind::Account
        );
        assert_eq!(SessionKind::from_url("wss://x"), SessionKind::Market);
    }

    #[test]
    fn expiry_checks() {
        let fresh = StreamSession::with_ttl("wss://x", "abc", Duration::from_secs(3600));
        assert!(!fresh.is_expired());
        assert!(!fresh.expires_within(Duration::from_secs(60)));
        assert!(fresh.expires_within(Duration::from_secs(7200)));

        let stale = StreamSession::new("wss://x", "abc", Utc::now() - chrono::Duration::seconds(1));
        assert!(stale.is_expired());
        assert!(stale.is_active());
    }

    #[test]
    fn debug_redacts_session_id() {
        let session = StreamSession::with_ttl("wss://x", "secret-id", DEFAULT_SESSION_TTL);
        let debug = format!("{session:?}");
        assert!(!debug.contains("secret-id"));
        assert!(debug.contains("[REDACTED]"));
    }
}
