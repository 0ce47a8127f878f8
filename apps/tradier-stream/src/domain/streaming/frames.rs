//! Outbound Frames
//!
//! Control frames written to the streaming connection.
//!
//! # Wire Format (JSON)
//! ```json
//! {"type":"subscribe","to":"quote","symbols":["AAPL"]}
//! {"type":"unsubscribe","to":"trade","symbols":["MSFT"]}
//! {"type":"subscribe","to":"order"}
//! {"type":"heartbeat","timestamp":1700000000000}
//! ```

use chrono::Utc;
use serde::Serialize;

use super::events::EventKind;

/// Subscribe or unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameAction {
    /// Start receiving a kind.
    Subscribe,
    /// Stop receiving a kind.
    Unsubscribe,
}

/// Subscription control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionFrame {
    /// Frame action.
    #[serde(rename = "type")]
    pub action: FrameAction,
    /// Target event kind.
    pub to: EventKind,
    /// Symbols; omitted for account-level kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<String>>,
}

impl SubscriptionFrame {
    /// Subscribe frame for `kind`.
    ///
    /// Symbols are dropped for account-level kinds.
    #[must_use]
    pub fn subscribe(kind: EventKind, symbols: &[String]) -> Self {
        Self::new(FrameAction::Subscribe, kind, symbols)
    }

    /// Unsubscribe frame for `kind`.
    #[must_use]
    pub fn unsubscribe(kind: EventKind, symbols: &[String]) -> Self {
        Self::new(FrameAction::Unsubscribe, kind, symbols)
    }

    fn new(action: FrameAction, to: EventKind, symbols: &[String]) -> Self {
        let symbols = (!to.is_account_level()).then(|| symbols.to_vec());
        Self {
            action,
            to,
            symbols,
        }
    }

    /// Serialize to the wire representation.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Keepalive frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeartbeatFrame {
    #[serde(rename = "type")]
    frame_type: &'static str,
    /// Epoch milliseconds at creation.
    pub timestamp: i64,
}

impl HeartbeatFrame {
    /// Heartbeat stamped with the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::at(Utc::now().timestamp_millis())
    }

    /// Heartbeat with an explicit timestamp.
    #[must_use]
    pub const fn at(timestamp: i64) -> Self {
        Self {
            frame_type: "heartbeat",
            timestamp,
        }
    }

    /// Serialize to the wire representation.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_quote_frame_json() {
        let frame = SubscriptionFrame::subscribe(EventKind::Quote, &["AAPL".to_string()]);
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"type":"subscribe","to":"quote","symbols":["AAPL"]}"#
        );
    }

    #[test]
    fn unsubscribe_frame_json() {
        let frame = SubscriptionFrame::unsubscribe(
            EventKind::Trade,
            &["MSFT".to_string(), "TSLA".to_string()],
        );
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"type":"unsubscribe","to":"trade","symbols":["MSFT","TSLA"]}"#
        );
    }

    #[test]
    fn account_frames_omit_symbols() {
        let frame = SubscriptionFrame::subscribe(EventKind::Order, &["IGNORED".to_string()]);
        assert!(frame.symbols.is_none());
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"type":"subscribe","to":"order"}"#
        );
    }

    #[test]
    fn heartbeat_frame_json() {
        let frame = HeartbeatFrame::at(1_700_000_000_000);
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"type":"heartbeat","timestamp":1700000000000}"#
        );
    }

    #[test]
    fn heartbeat_now_is_recent() {
        let before = Utc::now().timestamp_millis();
        let frame = HeartbeatFrame::now();
        assert!(frame.timestamp >= before);
    }
}
