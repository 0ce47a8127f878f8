//! Streaming Event Types
//!
//! Inbound messages are discriminated by their `type` field. Field names are
//! fixed by the upstream provider and matched case-sensitively.
//!
//! # Wire Format (JSON)
//! ```json
//! {"type":"trade","symbol":"AAPL","exch":"Q","price":"150.25","size":"100","cvol":"1200","date":"1700000000000","last":"150.25"}
//! {"type":"quote","symbol":"AAPL","bid":150.2,"bidsz":3,"bidexch":"Q","biddate":"1700000000000","ask":150.3,"asksz":5,"askexch":"P","askdate":"1700000000000"}
//! {"type":"summary","symbol":"AAPL","open":"149.0","high":"151.0","low":"148.5","prevClose":"148.9"}
//! {"type":"timesale","symbol":"AAPL","exch":"Q","bid":"150.2","ask":"150.3","last":"150.25","size":"100","date":"1700000000000","seq":42,"flag":"","cancel":false,"correction":false,"session":"normal"}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::fields::{bool_field, f64_field, i64_field, string_field};

// =============================================================================
// Event Kind
// =============================================================================

/// Discriminator used for routing and for the `to` field of subscribe frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Last-sale trade prints.
    Trade,
    /// Top-of-book quotes.
    Quote,
    /// Session OHLC summary.
    Summary,
    /// Time-and-sales prints.
    Timesale,
    /// Account order events.
    Order,
    /// Account position events.
    Position,
}

impl EventKind {
    /// All kinds in routing order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Trade,
            Self::Quote,
            Self::Summary,
            Self::Timesale,
            Self::Order,
            Self::Position,
        ]
    }

    /// Wire name of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Quote => "quote",
            Self::Summary => "summary",
            Self::Timesale => "timesale",
            Self::Order => "order",
            Self::Position => "position",
        }
    }

    /// Parse a wire `type` value. Case-sensitive.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "trade" => Some(Self::Trade),
            "quote" => Some(Self::Quote),
            "summary" => Some(Self::Summary),
            "timesale" => Some(Self::Timesale),
            "order" => Some(Self::Order),
            "position" => Some(Self::Position),
            _ => None,
        }
    }

    /// Account-level kinds are subscribed without a symbol list.
    #[must_use]
    pub const fn is_account_level(&self) -> bool {
        matches!(self, Self::Order | Self::Position)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Market Events
// =============================================================================

/// Trade print.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TradeEvent {
    /// Ticker symbol.
    pub symbol: String,
    /// Exchange code (`exch`).
    pub exchange: String,
    /// Trade price.
    pub price: f64,
    /// Trade size.
    pub size: i64,
    /// Cumulative volume (`cvol`).
    pub cumulative_volume: i64,
    /// Epoch milliseconds.
    pub date: i64,
    /// Last price.
    pub last: f64,
}

impl TradeEvent {
    fn from_message(message: &Value) -> Self {
        Self {
            symbol: string_field(message, "symbol"),
            exchange: string_field(message, "exch"),
            price: f64_field(message, "price"),
            size: i64_field(message, "size"),
            cumulative_volume: i64_field(message, "cvol"),
            date: i64_field(message, "date"),
            last: f64_field(message, "last"),
        }
    }
}

/// Top-of-book quote.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QuoteEvent {
    /// Ticker symbol.
    pub symbol: String,
    /// Best bid.
    pub bid: f64,
    /// Bid size (`bidsz`).
    pub bid_size: i64,
    /// Bid exchange (`bidexch`).
    pub bid_exchange: String,
    /// Bid timestamp, epoch milliseconds (`biddate`).
    pub bid_date: i64,
    /// Best ask.
    pub ask: f64,
    /// Ask size (`asksz`).
    pub ask_size: i64,
    /// Ask exchange (`askexch`).
    pub ask_exchange: String,
    /// Ask timestamp, epoch milliseconds (`askdate`).
    pub ask_date: i64,
}

impl QuoteEvent {
    fn from_message(message: &Value) -> Self {
        Self {
            symbol: string_field(message, "symbol"),
            bid: f64_field(message, "bid"),
            bid_size: i64_field(message, "bidsz"),
            bid_exchange: string_field(message, "bidexch"),
            bid_date: i64_field(message, "biddate"),
            ask: f64_field(message, "ask"),
            ask_size: i64_field(message, "asksz"),
            ask_exchange: string_field(message, "askexch"),
            ask_date: i64_field(message, "askdate"),
        }
    }

    /// Bid/ask spread.
    #[must_use]
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

/// Session summary.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SummaryEvent {
    /// Ticker symbol.
    pub symbol: String,
    /// Session open.
    pub open: f64,
    /// Session high.
    pub high: f64,
    /// Session low.
    pub low: f64,
    /// Previous close (`prevClose`).
    pub prev_close: f64,
}

impl SummaryEvent {
    fn from_message(message: &Value) -> Self {
        Self {
            symbol: string_field(message, "symbol"),
            open: f64_field(message, "open"),
            high: f64_field(message, "high"),
            low: f64_field(message, "low"),
            prev_close: f64_field(message, "prevClose"),
        }
    }
}

/// Time-and-sales print.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TimesaleEvent {
    /// Ticker symbol.
    pub symbol: String,
    /// Exchange code (`exch`).
    pub exchange: String,
    /// Bid at time of sale.
    pub bid: f64,
    /// Ask at time of sale.
    pub ask: f64,
    /// Sale price.
    pub last: f64,
    /// Sale size.
    pub size: i64,
    /// Epoch milliseconds.
    pub date: i64,
    /// Sequence number.
    pub seq: i64,
    /// Sale condition flag.
    pub flag: String,
    /// Print was cancelled.
    pub cancel: bool,
    /// Print is a correction.
    pub correction: bool,
    /// Trading session label.
    pub session: String,
}

impl TimesaleEvent {
    fn from_message(message: &Value) -> Self {
        Self {
            symbol: string_field(message, "symbol"),
            exchange: string_field(message, "exch"),
            bid: f64_field(message, "bid"),
            ask: f64_field(message, "ask"),
            last: f64_field(message, "last"),
            size: i64_field(message, "size"),
            date: i64_field(message, "date"),
            seq: i64_field(message, "seq"),
            flag: string_field(message, "flag"),
            cancel: bool_field(message, "cancel"),
            correction: bool_field(message, "correction"),
            session: string_field(message, "session"),
        }
    }
}

// =============================================================================
// Account Events
// =============================================================================

/// Order lifecycle event from the account stream.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OrderEvent {
    /// Broker order ID.
    pub id: i64,
    /// Account number.
    pub account: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Order status (`open`, `filled`, ...).
    pub status: String,
    /// Order side.
    pub side: String,
    /// Limit price.
    pub price: f64,
    /// Stop price.
    pub stop_price: f64,
    /// Average fill price.
    pub avg_fill_price: f64,
    /// Filled quantity so far.
    pub executed_quantity: f64,
    /// Quantity of the most recent fill.
    pub last_fill_quantity: f64,
    /// Quantity still working.
    pub remaining_quantity: f64,
    /// Event timestamp as sent.
    pub transaction_date: String,
    /// Order creation timestamp as sent.
    pub create_date: String,
}

impl OrderEvent {
    fn from_message(message: &Value) -> Self {
        Self {
            id: i64_field(message, "id"),
            account: string_field(message, "account"),
            symbol: string_field(message, "symbol"),
            status: string_field(message, "status"),
            side: string_field(message, "side"),
            price: f64_field(message, "price"),
            stop_price: f64_field(message, "stop_price"),
            avg_fill_price: f64_field(message, "avg_fill_price"),
            executed_quantity: f64_field(message, "executed_quantity"),
            last_fill_quantity: f64_field(message, "last_fill_quantity"),
            remaining_quantity: f64_field(message, "remaining_quantity"),
            transaction_date: string_field(message, "transaction_date"),
            create_date: string_field(message, "create_date"),
        }
    }
}

/// Position change from the account stream.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PositionEvent {
    /// Account number.
    pub account: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Signed position quantity.
    pub quantity: f64,
    /// Total cost basis.
    pub cost_basis: f64,
    /// Acquisition timestamp as sent.
    pub date_acquired: String,
}

impl PositionEvent {
    fn from_message(message: &Value) -> Self {
        Self {
            account: string_field(message, "account"),
            symbol: string_field(message, "symbol"),
            quantity: f64_field(message, "quantity"),
            cost_basis: f64_field(message, "cost_basis"),
            date_acquired: string_field(message, "date_acquired"),
        }
    }
}

// =============================================================================
// Tagged Event
// =============================================================================

/// One parsed inbound event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Trade print.
    Trade(TradeEvent),
    /// Quote update.
    Quote(QuoteEvent),
    /// Session summary.
    Summary(SummaryEvent),
    /// Time-and-sales print.
    Timesale(TimesaleEvent),
    /// Order event.
    Order(OrderEvent),
    /// Position event.
    Position(PositionEvent),
}

impl StreamEvent {
    /// Build the event for `kind` from a decoded message, using permissive
    /// defaults for absent or malformed fields.
    #[must_use]
    pub fn from_message(kind: EventKind, message: &Value) -> Self {
        match kind {
            EventKind::Trade => Self::Trade(TradeEvent::from_message(message)),
            EventKind::Quote => Self::Quote(QuoteEvent::from_message(message)),
            EventKind::Summary => Self::Summary(SummaryEvent::from_message(message)),
            EventKind::Timesale => Self::Timesale(TimesaleEvent::from_message(message)),
            EventKind::Order => Self::Order(OrderEvent::from_message(message)),
            EventKind::Position => Self::Position(PositionEvent::from_message(message)),
        }
    }

    /// Kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Trade(_) => EventKind::Trade,
            Self::Quote(_) => EventKind::Quote,
            Self::Summary(_) => EventKind::Summary,
            Self::Timesale(_) => EventKind::Timesale,
            Self::Order(_) => EventKind::Order,
            Self::Position(_) => EventKind::Position,
        }
    }

    /// Symbol carried by this event.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Trade(e) => &e.symbol,
            Self::Quote(e) => &e.symbol,
            Self::Summary(e) => &e.symbol,
            Self::Timesale(e) => &e.symbol,
            Self::Order(e) => &e.symbol,
            Self::Position(e) => &e.symbol,
        }
    }
}
