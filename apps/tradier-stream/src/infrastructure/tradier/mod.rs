//! Tradier Streaming Adapters
//!
//! Production transports and the connection supervisor.
//!
//! # Components
//!
//! - `client`: `StreamingClient`, the connection supervisor
//! - `dispatcher`: Inbound message parsing, filtering and routing
//! - `heartbeat`: Keep-alive task with bounded failure tolerance
//! - `http_client`: REST transport with rate limiting and retry
//! - `rate_limit`: Token bucket pacing for REST calls
//! - `reconnect`: Exponential backoff with jitter
//! - `reporter`: Error handler fan-out and error counting
//! - `websocket`: `tokio-tungstenite` duplex connection

mod client;
mod dispatcher;
mod heartbeat;
mod http_client;
mod rate_limit;
mod reconnect;
mod reporter;
mod websocket;

pub use client::{ConnectionState, StreamingClient};
pub use dispatcher::{DispatchOutcome, EventDispatcher};
pub use heartbeat::{
    HeartbeatConfig, HeartbeatExit, HeartbeatHandle, HeartbeatMonitor, HeartbeatState,
};
pub use http_client::TradierHttpClient;
pub use rate_limit::TokenBucket;
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use reporter::{ErrorHandler, ErrorReporter};
pub use websocket::WebSocketConnection;
