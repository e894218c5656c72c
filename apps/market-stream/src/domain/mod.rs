//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for trade streaming with no
//! I/O. All types here are pure Rust with serialization support.

/// Connection lifecycle and asset class types.
pub mod streaming;

/// Instrument subscription sets.
pub mod subscription;

/// Trade records and decoded frames.
pub mod trade;

/// Exchange trading session calendar.
pub mod session;
