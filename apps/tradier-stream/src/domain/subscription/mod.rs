//! Subscription Registry
//!
//! Single source of truth for what the connection should be receiving and
//! who should be told about it:
//!
//! - symbols currently subscribed upstream
//! - event kinds that have been subscribed (for replay after reconnect)
//! - client-side symbol and exchange allow-lists
//! - at most one handler per event kind
//!
//! All state sits behind one mutex. The dispatcher takes a routing decision
//! with [`SubscriptionRegistry::route`], which evaluates both filters and
//! clones the handler under a single lock acquisition, so a message is never
//! judged against a half-applied update. The lock is released before the
//! handler runs.
//!
//! The registry never performs network I/O; callers send the matching
//! subscribe/unsubscribe frames.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::streaming::{EventKind, StreamEvent, SubscriptionFrame};

// =============================================================================
// Types
// =============================================================================

/// A symbol string (ticker or OCC option symbol).
pub type Symbol = String;

/// User callback for one event kind.
///
/// Returning an error (or panicking) is reported through the error handler
/// and never interrupts the stream.
pub type EventCallback = Arc<dyn Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync>;

/// Outcome of evaluating a message against the registry.
#[derive(Clone)]
pub enum Route {
    /// Message passes all filters and has a handler.
    Deliver(EventCallback),
    /// Symbol is outside the symbol filter.
    FilteredSymbol,
    /// Exchange is outside the exchange filter.
    FilteredExchange,
    /// No handler registered for the kind.
    NoHandler,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deliver(_) => f.write_str("Deliver"),
            Self::FilteredSymbol => f.write_str("FilteredSymbol"),
            Self::FilteredExchange => f.write_str("FilteredExchange"),
            Self::NoHandler => f.write_str("NoHandler"),
        }
    }
}

/// Registry counts for logging and metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Subscribed symbols.
    pub symbols: usize,
    /// Subscribed event kinds.
    pub kinds: usize,
    /// Registered handlers.
    pub handlers: usize,
    /// Whether any client-side filter is set.
    pub filtering: bool,
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Default)]
struct SubscriptionState {
    subscribed_symbols: BTreeSet<Symbol>,
    active_kinds: BTreeSet<EventKind>,
    symbol_filter: HashSet<Symbol>,
    exchange_filter: HashSet<String>,
    handlers: HashMap<EventKind, EventCallback>,
}

impl SubscriptionState {
    fn exchange_allowed(&self, exchanges: &[&str], defaults: &HashSet<String>) -> bool {
        let filter = if self.exchange_filter.is_empty() {
            defaults
        } else {
            &self.exchange_filter
        };

        let mut carried = exchanges.iter().filter(|e| !e.is_empty()).peekable();
        if filter.is_empty() || carried.peek().is_none() {
            return true;
        }
        carried.any(|e| filter.contains(*e))
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe subscription registry.
///
/// # Example
///
/// ```rust
/// use tradier_stream::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
///
/// let added = registry.add_symbols(&["AAPL".to_string(), "MSFT".to_string()]);
/// assert_eq!(added.len(), 2);
///
/// // Idempotent
/// let added = registry.add_symbols(&["AAPL".to_string()]);
/// assert!(added.is_empty());
///
/// let removed = registry.remove_symbols(&["MSFT".to_string()]);
/// assert_eq!(removed, vec!["MSFT".to_string()]);
/// assert!(registry.subscribed_symbols().contains("AAPL"));
/// ```
#[derive(Default)]
pub struct SubscriptionRegistry {
    state: Mutex<SubscriptionState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add symbols. Returns the ones that were not already present.
    pub fn add_symbols(&self, symbols: &[Symbol]) -> Vec<Symbol> {
        let mut state = self.state.lock();
        symbols
            .iter()
            .filter(|s| !s.is_empty() && state.subscribed_symbols.insert((*s).clone()))
            .cloned()
            .collect()
    }

    /// Remove symbols. Returns the ones that were present.
    pub fn remove_symbols(&self, symbols: &[Symbol]) -> Vec<Symbol> {
        let mut state = self.state.lock();
        symbols
            .iter()
            .filter(|s| state.subscribed_symbols.remove(*s))
            .cloned()
            .collect()
    }

    /// Snapshot of subscribed symbols.
    #[must_use]
    pub fn subscribed_symbols(&self) -> BTreeSet<Symbol> {
        self.state.lock().subscribed_symbols.clone()
    }

    /// Record that `kind` has been subscribed on the wire.
    pub fn activate_kind(&self, kind: EventKind) {
        self.state.lock().active_kinds.insert(kind);
    }

    /// Kinds subscribed so far.
    #[must_use]
    pub fn active_kinds(&self) -> Vec<EventKind> {
        self.state.lock().active_kinds.iter().copied().collect()
    }

    /// Market-data kinds subscribed so far.
    #[must_use]
    pub fn active_market_kinds(&self) -> Vec<EventKind> {
        self.state
            .lock()
            .active_kinds
            .iter()
            .copied()
            .filter(|k| !k.is_account_level())
            .collect()
    }

    /// Replace the symbol allow-list. Empty means pass everything.
    pub fn set_symbol_filter(&self, symbols: impl IntoIterator<Item = Symbol>) {
        self.state.lock().symbol_filter = symbols.into_iter().collect();
    }

    /// Replace the exchange allow-list. Empty means pass everything.
    pub fn set_exchange_filter(&self, exchanges: impl IntoIterator<Item = String>) {
        self.state.lock().exchange_filter = exchanges.into_iter().collect();
    }

    /// Remove both filters.
    pub fn clear_filters(&self) {
        let mut state = self.state.lock();
        state.symbol_filter.clear();
        state.exchange_filter.clear();
    }

    /// Install the handler for `kind`, replacing any previous one.
    ///
    /// Returns `true` if a handler was replaced.
    pub fn register_handler(&self, kind: EventKind, callback: EventCallback) -> bool {
        self.state.lock().handlers.insert(kind, callback).is_some()
    }

    /// Remove the handler for `kind`.
    pub fn remove_handler(&self, kind: EventKind) -> bool {
        self.state.lock().handlers.remove(&kind).is_some()
    }

    /// Whether a handler is installed for `kind`.
    #[must_use]
    pub fn has_handler(&self, kind: EventKind) -> bool {
        self.state.lock().handlers.contains_key(&kind)
    }

    /// Decide what to do with a message of `kind` for `symbol` carrying
    /// `exchanges`.
    ///
    /// `default_exchanges` applies when no explicit exchange filter is set.
    /// A message passes the exchange check when it carries no exchange, or
    /// when at least one carried exchange is allowed.
    #[must_use]
    pub fn route(
        &self,
        kind: EventKind,
        symbol: &str,
        exchanges: &[&str],
        default_exchanges: &HashSet<String>,
    ) -> Route {
        let state = self.state.lock();

        if !state.symbol_filter.is_empty() && !state.symbol_filter.contains(symbol) {
            return Route::FilteredSymbol;
        }

        if !state.exchange_allowed(exchanges, default_exchanges) {
            return Route::FilteredExchange;
        }

        state
            .handlers
            .get(&kind)
            .cloned()
            .map_or(Route::NoHandler, Route::Deliver)
    }

    /// Frames that restore every active subscription on a fresh connection.
    #[must_use]
    pub fn replay_frames(&self) -> Vec<SubscriptionFrame> {
        let state = self.state.lock();
        let symbols: Vec<Symbol> = state.subscribed_symbols.iter().cloned().collect();

        state
            .active_kinds
            .iter()
            .filter(|kind| kind.is_account_level() || !symbols.is_empty())
            .map(|kind| SubscriptionFrame::subscribe(*kind, &symbols))
            .collect()
    }

    /// Current counts.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.lock();
        SubscriptionStats {
            symbols: state.subscribed_symbols.len(),
            kinds: state.active_kinds.len(),
            handlers: state.handlers.len(),
            filtering: !state.symbol_filter.is_empty() || !state.exchange_filter.is_empty(),
        }
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}
