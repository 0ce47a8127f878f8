//! Prometheus Metrics Module
//!
//! Exposes streaming metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Inbound messages received and delivered by event kind
//! - **Connection**: Connection state, reconnects, heartbeat failures
//! - **Errors**: Stream errors by type
//! - **Latency**: Handler dispatch latency
//! - **HTTP**: Session and REST request outcomes
//!
//! # Integration
//!
//! The library records through the `metrics` facade only. Nothing is exported
//! unless the embedding binary installs a recorder with [`init_metrics`].

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::EventKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and serve `/metrics` on `port`.
///
/// Must be called from within a tokio runtime. Subsequent calls return the
/// handle installed by the first.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind or another global recorder
/// is already installed.
pub fn init_metrics(port: u16) -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(addr).build()?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|_| anyhow::anyhow!("a global metrics recorder is already installed"))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::warn!(error = ?e, "Metrics exporter stopped");
        }
    });

    register_metrics();
    tracing::info!(%addr, "Prometheus metrics exporter listening");
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "tradier_stream_messages_received_total",
        "Total inbound stream messages"
    );
    describe_counter!(
        "tradier_stream_messages_processed_total",
        "Total messages delivered to a handler"
    );
    describe_counter!(
        "tradier_stream_messages_filtered_total",
        "Total messages dropped by client-side filters"
    );

    describe_gauge!(
        "tradier_stream_connected",
        "Whether the streaming connection is open (1) or closed (0)"
    );
    describe_gauge!(
        "tradier_stream_subscribed_symbols",
        "Number of subscribed symbols"
    );

    describe_counter!(
        "tradier_stream_errors_total",
        "Total stream errors by type"
    );
    describe_counter!(
        "tradier_stream_reconnects_total",
        "Total completed reconnects"
    );
    describe_counter!(
        "tradier_stream_heartbeat_failures_total",
        "Total failed heartbeat sends"
    );

    describe_counter!(
        "tradier_stream_http_requests_total",
        "Total HTTP requests by method and status class"
    );

    describe_histogram!(
        "tradier_stream_dispatch_seconds",
        "Time spent inside user handlers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a message was not delivered.
#[derive(Debug, Clone, Copy)]
pub enum FilterReason {
    /// Symbol outside the symbol filter.
    Symbol,
    /// Exchange outside the exchange filter.
    Exchange,
    /// Identical to the previous message.
    Duplicate,
}

impl FilterReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Symbol => "symbol",
            Self::Exchange => "exchange",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Record an inbound message. `kind` is `None` for untyped messages.
pub fn record_message_received(kind: Option<EventKind>) {
    counter!(
        "tradier_stream_messages_received_total",
        "kind" => kind.map_or("unknown", |k| k.as_str())
    )
    .increment(1);
}

/// Record a delivered message.
pub fn record_message_processed(kind: EventKind) {
    counter!(
        "tradier_stream_messages_processed_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a filtered message.
pub fn record_message_filtered(kind: EventKind, reason: FilterReason) {
    counter!(
        "tradier_stream_messages_filtered_total",
        "kind" => kind.as_str(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the connection state gauge.
pub fn set_connected(connected: bool) {
    gauge!("tradier_stream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Update the subscribed symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribed_symbols(count: usize) {
    gauge!("tradier_stream_subscribed_symbols").set(count as f64);
}

/// Record a stream error.
pub fn record_error(error_type: &'static str) {
    counter!(
        "tradier_stream_errors_total",
        "error_type" => error_type
    )
    .increment(1);
}

/// Record a completed reconnect.
pub fn record_reconnect() {
    counter!("tradier_stream_reconnects_total").increment(1);
}

/// Record a failed heartbeat send.
pub fn record_heartbeat_failure() {
    counter!("tradier_stream_heartbeat_failures_total").increment(1);
}

/// Record an HTTP request outcome.
pub fn record_http_request(method: &'static str, status: u16) {
    counter!(
        "tradier_stream_http_requests_total",
        "method" => method,
        "status" => status_class(status)
    )
    .increment(1);
}

/// Record time spent inside a handler.
pub fn record_dispatch_duration(kind: EventKind, duration: Duration) {
    histogram!(
        "tradier_stream_dispatch_seconds",
        "kind" => kind.as_str()
    )
    .record(duration.as_secs_f64());
}

const fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_reason_as_str() {
        assert_eq!(FilterReason::Symbol.as_str(), "symbol");
        assert_eq!(FilterReason::Exchange.as_str(), "exchange");
        assert_eq!(FilterReason::Duplicate.as_str(), "duplicate");
    }

    #[test]
    fn status_classes() {
        assert_eq!(status_class(200), "2xx");
        assert_eq!(status_class(302), "3xx");
        assert_eq!(status_class(429), "4xx");
        assert_eq!(status_class(503), "5xx");
        assert_eq!(status_class(0), "other");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_message_received(Some(EventKind::Quote));
        record_message_received(None);
        record_message_processed(EventKind::Trade);
        set_connected(true);
        record_error("parse");
    }
}
