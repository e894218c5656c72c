//! Streaming Lifecycle Types
//!
//! Asset classes served by the client and the connection state machine
//! each stream moves through.

use serde::Serialize;

// =============================================================================
// Asset Class
// =============================================================================

/// Asset class served by one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    /// Listed equities (bare tickers such as `AAPL`).
    Stock,
    /// Crypto pairs (venue-qualified such as `BINANCE:BTCUSDT`).
    Crypto,
}

impl AssetClass {
    /// Get the asset class label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stock => "stock",
            Self::Crypto => "crypto",
        }
    }
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of a single stream.
///
/// ```text
/// Disconnected ─connect─► Connecting ─subscribe─► Subscribed ─stream─► Streaming
///       ▲                     │                                         │
///       └──────failure────────┘            Reconnecting ◄──read error───┘
///                                               │  ▲
///                                               └──┘ retry after backoff
/// ```
///
/// `Closed` is terminal and reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket open.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open and subscribe messages sent.
    Subscribed,
    /// Read loop running.
    Streaming,
    /// Transport lost, running the reconnect protocol.
    Reconnecting,
    /// Explicitly closed; no further reconnect attempts.
    Closed,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }

    /// Numeric encoding for the connection state gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Subscribed => 2.0,
            Self::Streaming => 3.0,
            Self::Reconnecting => 4.0,
            Self::Closed => 5.0,
        }
    }

    /// Check whether the state is terminal.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time view of one stream, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSnapshot {
    /// Asset class served.
    pub asset_class: AssetClass,
    /// Connection state.
    pub state: ConnectionState,
    /// Number of subscribed symbols.
    pub symbols: usize,
    /// Transport connect attempts, including the initial connect.
    pub connect_attempts: u64,
    /// Successful reconnects (connect plus resubscribe).
    pub reconnects: u64,
    /// Consecutive failed reconnect attempts (0 while streaming).
    pub reconnect_attempts: u32,
    /// Frames read from the transport.
    pub frames_received: u64,
    /// Trade records dispatched to handlers.
    pub trades_dispatched: u64,
    /// Frames dropped because they failed to decode.
    pub decode_failures: u64,
    /// Handler invocations that panicked.
    pub handler_panics: u64,
    /// Last time the stream reached `Streaming`.
    pub last_connected_at: Option<chrono::DateTime<chrono::Utc>>,
}
