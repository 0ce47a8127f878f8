#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Tradier Stream - Streaming market and account events
//!
//! Client core for Tradier's streaming API: session creation over REST,
//! a WebSocket connection with keep-alive, and dispatch of inbound events
//! to per-kind handlers with symbol, exchange and duplicate filtering.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Event types, sessions, subscription state, statistics
//! - **Application**: Ports (`HttpTransport`, `DuplexConnection`) and the
//!   session manager
//! - **Infrastructure**: REST and WebSocket adapters, the streaming
//!   supervisor, configuration, metrics and telemetry
//!
//! # Data Flow
//!
//! ```text
//!   REST ──▶ SessionManager ──▶ StreamSession
//!                                    │
//!                                    ▼
//!   WebSocket ◀──frames── StreamingClient ──▶ HeartbeatMonitor
//!       │
//!       └──text──▶ EventDispatcher ──▶ filters ──▶ handler(kind)
//!                        │
//!                        └──▶ ErrorReporter ──▶ error handler
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no I/O.
pub mod domain;

/// Application layer - Ports and session use cases.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Error taxonomy shared across layers.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::session::{DEFAULT_SESSION_TTL, SessionKind, StreamSession};
pub use domain::statistics::{StatisticsSnapshot, StreamStatistics};
pub use domain::streaming::{
    EventKind, HeartbeatFrame, OrderEvent, PositionEvent, QuoteEvent, StreamEvent,
    SubscriptionFrame, SummaryEvent, TimesaleEvent, TradeEvent,
};
pub use domain::subscription::{EventCallback, SubscriptionRegistry, SubscriptionStats, Symbol};

// Errors
pub use error::{StreamError, StreamResult};

// Application
pub use application::ports::{DuplexConnection, HttpTransport};
pub use application::services::{SessionManager, SessionSettings};

// Infrastructure config
pub use infrastructure::config::{
    ClientConfig, ConfigError, Credentials, Environment, HttpSettings, StreamingConfig,
};

// Streaming client
pub use infrastructure::tradier::{
    ConnectionState, StreamingClient, TradierHttpClient, WebSocketConnection,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
