//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (transport, credentials, streams).
pub mod ports;

/// Application services for dispatch, credentials and coordination.
pub mod services;
