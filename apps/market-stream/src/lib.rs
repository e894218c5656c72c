#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Stream - Resilient Trade Streaming Client
//!
//! Keeps one WebSocket per asset class subscribed to Finnhub's trade stream,
//! recovers from transport failure with capped exponential backoff and fans
//! decoded trades out to in-process handlers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `trade`: Trade records and decoded frames
//!   - `subscription`: Per-stream subscription sets
//!   - `streaming`: Asset classes and the connection state machine
//!   - `session`: Exchange trading hours
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport, credential and stream interfaces
//!   - `services`: Handler registry, credential cache, coordinator
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `finnhub`: WebSocket transport, codec, connection manager
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────────────┐
//! Finnhub WS ───────►│ ConnectionManager    │──► H1(A), H2(A), H1(B), H2(B)
//!   (stocks)         │   stock              │
//!                    └──────────────────────┘
//!                    ┌──────────────────────┐
//! Finnhub WS ───────►│ ConnectionManager    │──► handlers
//!   (crypto)         │   crypto             │
//!                    └──────────────────────┘
//!                              ▲
//!                    MarketCoordinator (start, run, shutdown)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::session::MarketSession;
pub use domain::streaming::{AssetClass, ConnectionState, StreamSnapshot};
pub use domain::subscription::{SubscriptionSet, Symbol};
pub use domain::trade::{TradeEnvelope, TradeRecord, crypto_pair, display_symbol};

// Ports
pub use application::ports::{
    AccountSelector, Credential, CredentialError, CredentialSource, MarketStreamer,
    StreamConnection, StreamError, StreamTransport, TransportError,
};

// Services
pub use application::services::{
    CoordinatorError, CredentialCache, DispatchOutcome, FailurePolicy, HandlerRegistry,
    MarketCoordinator, StartupConfig, StaticCredentialSource, TradeHandler,
};

// Infrastructure config
pub use infrastructure::config::{ApiKey, ConfigError, ReconnectSettings, StreamerConfig};

// Finnhub adapters
pub use infrastructure::finnhub::{
    ConnectionManager, JsonCodec, ManagerConfig, ReconnectConfig, ReconnectPolicy,
    TungsteniteTransport,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
