//! Streaming Types
//!
//! Event kinds, parsed events, outbound frames, and the permissive field
//! coercion shared by every event parser.

mod events;
pub mod fields;
mod frames;

pub use events::{
    EventKind, OrderEvent, PositionEvent, QuoteEvent, StreamEvent, SummaryEvent, TimesaleEvent,
    TradeEvent,
};
pub use frames::{FrameAction, HeartbeatFrame, SubscriptionFrame};
