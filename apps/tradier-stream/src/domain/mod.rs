//! Domain Layer - Core streaming types and state.
//!
//! Event types, sessions, subscription state and statistics. Nothing here
//! performs I/O.

/// Streaming session handle and expiry.
pub mod session;

/// Stream statistics counters.
pub mod statistics;

/// Event kinds, parsed events and outbound frames.
pub mod streaming;

/// Subscription registry, filters and handlers.
pub mod subscription;
