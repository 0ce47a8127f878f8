//! Application Services
//!
//! Services that orchestrate domain logic over the ports.
//!
//! - `SessionManager`: creates and renews streaming sessions

mod session;

pub use session::{
    ACCOUNT_SESSION_PATH, MARKET_SESSION_PATH, SessionManager, SessionSettings, parse_session_body,
};
