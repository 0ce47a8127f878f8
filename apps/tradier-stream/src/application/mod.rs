//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (HTTP, duplex connection).
pub mod ports;

/// Application services (session management).
pub mod services;
