//! Finnhub WebSocket Message Types
//!
//! Outbound control messages for the trade stream. Inbound frames decode into
//! [`TradeEnvelope`](crate::domain::trade::TradeEnvelope) via the codec.
//!
//! # Control Messages
//!
//! ```json
//! {"type":"subscribe","symbol":"AAPL"}
//! ```
//!
//! One message per instrument. The upstream does not acknowledge
//! subscriptions; an unknown symbol simply never produces trades.
//!
//! # Inbound Frame Types
//!
//! - `trade`: carries a `data` array of trade records
//! - `ping`: keepalive, ignored
//! - `error`: carries a `msg` string, logged

use serde::Serialize;

/// Frame type sent by the upstream as a keepalive.
pub const PING_FRAME_TYPE: &str = "ping";

/// Frame type carrying an upstream error message.
pub const ERROR_FRAME_TYPE: &str = "error";

/// Control action for a single instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    /// Start receiving trades for the symbol.
    Subscribe,
}

/// Per-symbol control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlRequest {
    /// Requested action.
    #[serde(rename = "type")]
    pub action: ControlAction,

    /// Instrument identifier.
    pub symbol: String,
}

impl ControlRequest {
    /// Create a subscribe request for `symbol`.
    #[must_use]
    pub fn subscribe(symbol: impl Into<String>) -> Self {
        Self {
            action: ControlAction::Subscribe,
            symbol: symbol.into(),
        }
    }
}
