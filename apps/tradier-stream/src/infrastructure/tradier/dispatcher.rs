//! Event Dispatcher
//!
//! Turns one inbound text message into at most one handler invocation.
//!
//! # Pipeline
//!
//! 1. Count the message; decode JSON (failure is a reported parse error)
//! 2. Read `type`; absent or unknown types are dropped silently
//! 3. Route through the registry: symbol filter, exchange filter, handler
//! 4. Optionally drop exact repeats per (kind, symbol)
//! 5. Build the typed event and run the handler, containing errors and panics
//! 6. Count the message as processed only if the handler succeeded
//!
//! Dispatch never returns an error and never unwinds into the caller, which is
//! the connection's reader task.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::reporter::ErrorReporter;
use crate::domain::statistics::StreamStatistics;
use crate::domain::streaming::{EventKind, StreamEvent};
use crate::domain::subscription::{Route, SubscriptionRegistry};
use crate::error::StreamError;
use crate::infrastructure::config::StreamingConfig;
use crate::infrastructure::metrics::{self, FilterReason};

/// What happened to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handler ran successfully.
    Delivered(EventKind),
    /// Message was not valid JSON.
    Malformed,
    /// Message had no `type` field.
    Untyped,
    /// `type` is not a routed event kind.
    UnknownType,
    /// Dropped by the symbol filter.
    FilteredSymbol,
    /// Dropped by the exchange filter.
    FilteredExchange,
    /// Identical to the previous message for the same kind and symbol.
    Duplicate,
    /// No handler registered for the kind.
    NoHandler,
    /// Handler returned an error or panicked.
    HandlerFailed(EventKind),
}

/// Parses and routes inbound messages.
pub struct EventDispatcher {
    registry: Arc<SubscriptionRegistry>,
    stats: Arc<StreamStatistics>,
    reporter: Arc<ErrorReporter>,
    config: Arc<RwLock<StreamingConfig>>,
    last_payloads: Mutex<HashMap<(EventKind, String), Value>>,
}

impl EventDispatcher {
    /// Create a dispatcher over shared state.
    #[must_use]
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        stats: Arc<StreamStatistics>,
        reporter: Arc<ErrorReporter>,
        config: Arc<RwLock<StreamingConfig>>,
    ) -> Self {
        Self {
            registry,
            stats,
            reporter,
            config,
            last_payloads: Mutex::new(HashMap::new()),
        }
    }

    /// Forget previously seen payloads. Called on every new connection.
    pub fn reset_duplicates(&self) {
        self.last_payloads.lock().clear();
    }

    /// Dispatch one inbound message.
    pub fn dispatch(&self, text: &str) -> DispatchOutcome {
        self.stats.record_received();

        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                metrics::record_message_received(None);
                self.reporter
                    .report(&StreamError::Parse(format!("malformed message: {e}")));
                return DispatchOutcome::Malformed;
            }
        };

        let Some(type_name) = message.get("type").and_then(Value::as_str) else {
            metrics::record_message_received(None);
            return DispatchOutcome::Untyped;
        };

        let Some(kind) = EventKind::from_wire(type_name) else {
            metrics::record_message_received(None);
            tracing::trace!(message_type = type_name, "Ignoring unrouted message type");
            return DispatchOutcome::UnknownType;
        };
        metrics::record_message_received(Some(kind));

        let symbol = message
            .get("symbol")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let exchanges = carried_exchanges(kind, &message);

        let (route, filter_duplicates) = {
            let config = self.config.read();
            let route = self
                .registry
                .route(kind, symbol, &exchanges, &config.valid_exchanges);
            (route, config.filter_duplicates)
        };

        let handler = match route {
            Route::Deliver(handler) => handler,
            Route::FilteredSymbol => {
                metrics::record_message_filtered(kind, FilterReason::Symbol);
                return DispatchOutcome::FilteredSymbol;
            }
            Route::FilteredExchange => {
                metrics::record_message_filtered(kind, FilterReason::Exchange);
                return DispatchOutcome::FilteredExchange;
            }
            Route::NoHandler => return DispatchOutcome::NoHandler,
        };

        if filter_duplicates && self.is_duplicate(kind, symbol, &message) {
            metrics::record_message_filtered(kind, FilterReason::Duplicate);
            return DispatchOutcome::Duplicate;
        }

        let event = StreamEvent::from_message(kind, &message);
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| handler(&event)));
        metrics::record_dispatch_duration(kind, started.elapsed());

        let failure = match result {
            Ok(Ok(())) => {
                self.stats.record_processed();
                metrics::record_message_processed(kind);
                return DispatchOutcome::Delivered(kind);
            }
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
        };

        self.reporter.report(&StreamError::Callback {
            kind,
            message: failure,
        });
        DispatchOutcome::HandlerFailed(kind)
    }

    fn is_duplicate(&self, kind: EventKind, symbol: &str, message: &Value) -> bool {
        let mut last = self.last_payloads.lock();
        let key = (kind, symbol.to_string());
        if last.get(&key) == Some(message) {
            return true;
        }
        last.insert(key, message.clone());
        false
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Exchange codes a message carries, by kind.
fn carried_exchanges(kind: EventKind, message: &Value) -> Vec<&str> {
    let keys: &[&str] = match kind {
        EventKind::Trade | EventKind::Timesale => &["exch"],
        EventKind::Quote => &["bidexch", "askexch"],
        EventKind::Summary | EventKind::Order | EventKind::Position => &[],
    };
    keys.iter()
        .filter_map(|key| message.get(*key).and_then(Value::as_str))
        .collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::EventCallback;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        dispatcher: EventDispatcher,
        registry: Arc<SubscriptionRegistry>,
        stats: Arc<StreamStatistics>,
        config: Arc<RwLock<StreamingConfig>>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SubscriptionRegistry::new());
        let stats = Arc::new(StreamStatistics::new());
        let reporter = Arc::new(ErrorReporter::new(Arc::clone(&stats)));
        let config = Arc::new(RwLock::new(StreamingConfig::default()));
        let dispatcher = EventDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&stats),
            reporter,
            Arc::clone(&config),
        );
        Fixture {
            dispatcher,
            registry,
            stats,
            config,
        }
    }

    fn counting(counter: &Arc<AtomicUsize>) -> EventCallback {
        let counter = Arc::clone(counter);
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn delivers_trade_with_coerced_fields() {
        let f = fixture();
        let captured = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&captured);
        f.registry.register_handler(
            EventKind::Trade,
            Arc::new(move |event| {
                *sink.lock() = Some(event.clone());
                Ok(())
            }),
        );

        let outcome = f
            .dispatcher
            .dispatch(r#"{"type":"trade","symbol":"AAPL","price":"150.25","size":100}"#);
        assert_eq!(outcome, DispatchOutcome::Delivered(EventKind::Trade));

        let Some(StreamEvent::Trade(trade)) = captured.lock().clone() else {
            panic!("expected trade");
        };
        assert_eq!(trade.symbol, "AAPL");
        assert!((trade.price - 150.25).abs() < f64::EPSILON);
        assert_eq!(trade.size, 100);

        let snap = f.stats.snapshot();
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.messages_processed, 1);
        assert_eq!(snap.errors, 0);
    }

    #[test]
    fn malformed_json_counts_error() {
        let f = fixture();
        assert_eq!(f.dispatcher.dispatch("{not json"), DispatchOutcome::Malformed);
        let snap = f.stats.snapshot();
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.messages_processed, 0);
    }

    #[test]
    fn missing_or_unknown_type_is_silent() {
        let f = fixture();
        let count = Arc::new(AtomicUsize::new(0));
        for kind in EventKind::all() {
            f.registry.register_handler(*kind, counting(&count));
        }

        assert_eq!(
            f.dispatcher.dispatch(r#"{"symbol":"AAPL"}"#),
            DispatchOutcome::Untyped
        );
        assert_eq!(
            f.dispatcher.dispatch(r#"{"type":"heartbeat"}"#),
            DispatchOutcome::UnknownType
        );
        assert_eq!(
            f.dispatcher.dispatch(r#"{"type":"Quote","symbol":"AAPL"}"#),
            DispatchOutcome::UnknownType
        );
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(f.stats.snapshot().errors, 0);
    }

    #[test]
    fn no_handler_is_not_an_error() {
        let f = fixture();
        assert_eq!(
            f.dispatcher.dispatch(r#"{"type":"summary","symbol":"AAPL"}"#),
            DispatchOutcome::NoHandler
        );
        assert_eq!(f.stats.snapshot().errors, 0);
    }

    #[test]
    fn quote_exchange_filter_uses_either_side() {
        let f = fixture();
        let count = Arc::new(AtomicUsize::new(0));
        f.registry.register_handler(EventKind::Quote, counting(&count));
        f.registry.set_exchange_filter(vec!["Q".to_string()]);

        assert_eq!(
            f.dispatcher
                .dispatch(r#"{"type":"quote","symbol":"AAPL","bidexch":"N","askexch":"P"}"#),
            DispatchOutcome::FilteredExchange
        );
        assert_eq!(
            f.dispatcher
                .dispatch(r#"{"type":"quote","symbol":"AAPL","bidexch":"N","askexch":"Q"}"#),
            DispatchOutcome::Delivered(EventKind::Quote)
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn valid_exchanges_apply_by_default() {
        let f = fixture();
        let count = Arc::new(AtomicUsize::new(0));
        f.registry.register_handler(EventKind::Trade, counting(&count));
        f.config.write().valid_exchanges = ["Q".to_string()].into_iter().collect();

        assert_eq!(
            f.dispatcher
                .dispatch(r#"{"type":"trade","symbol":"AAPL","exch":"N"}"#),
            DispatchOutcome::FilteredExchange
        );
        assert_eq!(
            f.dispatcher
                .dispatch(r#"{"type":"trade","symbol":"AAPL","exch":"Q"}"#),
            DispatchOutcome::Delivered(EventKind::Trade)
        );
    }

    #[test]
    fn handler_error_is_reported_once() {
        let f = fixture();
        f.registry
            .register_handler(EventKind::Quote, Arc::new(|_| anyhow::bail!("boom")));

        let outcome = f
            .dispatcher
            .dispatch(r#"{"type":"quote","symbol":"AAPL"}"#);
        assert_eq!(outcome, DispatchOutcome::HandlerFailed(EventKind::Quote));

        let snap = f.stats.snapshot();
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.messages_processed, 0);
    }

    #[test]
    fn handler_panic_is_contained() {
        let f = fixture();
        f.registry
            .register_handler(EventKind::Quote, Arc::new(|_| panic!("handler bug")));

        let outcome = f
            .dispatcher
            .dispatch(r#"{"type":"quote","symbol":"AAPL"}"#);
        assert_eq!(outcome, DispatchOutcome::HandlerFailed(EventKind::Quote));
        assert_eq!(f.stats.snapshot().errors, 1);
    }

    #[test]
    fn duplicate_filtering_is_opt_in() {
        let f = fixture();
        let count = Arc::new(AtomicUsize::new(0));
        f.registry.register_handler(EventKind::Quote, counting(&count));
        let msg = r#"{"type":"quote","symbol":"AAPL","bid":1.0}"#;

        f.dispatcher.dispatch(msg);
        f.dispatcher.dispatch(msg);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        f.config.write().filter_duplicates = true;
        f.dispatcher.dispatch(msg);
        assert_eq!(f.dispatcher.dispatch(msg), DispatchOutcome::Duplicate);
        assert_eq!(count.load(Ordering::SeqCst), 3);

        // A different payload for the same symbol passes
        f.dispatcher
            .dispatch(r#"{"type":"quote","symbol":"AAPL","bid":1.1}"#);
        assert_eq!(count.load(Ordering::SeqCst), 4);

        f.dispatcher.reset_duplicates();
        f.dispatcher
            .dispatch(r#"{"type":"quote","symbol":"AAPL","bid":1.1}"#);
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
