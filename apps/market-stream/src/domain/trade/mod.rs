//! Trade Records
//!
//! The normalized unit flowing through the client. A [`TradeEnvelope`] is one
//! decoded frame from the upstream; only `trade` frames carry dispatchable
//! [`TradeRecord`]s, every other frame type is forward-compatible noise.
//!
//! # Wire Format
//!
//! ```json
//! {"type":"trade","data":[{"p":187.12,"s":"AAPL","t":1700000000000,"v":100}]}
//! ```

use serde::{Deserialize, Serialize};

/// Frame type carrying trade records.
pub const TRADE_FRAME_TYPE: &str = "trade";

/// Separator between venue and pair in crypto identifiers.
const VENUE_SEPARATOR: char = ':';

/// One executed trade for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Instrument identifier (`AAPL`, `BINANCE:BTCUSDT`).
    #[serde(rename = "s")]
    pub symbol: String,
    /// Last trade price.
    #[serde(rename = "p")]
    pub price: f64,
    /// Traded volume.
    #[serde(rename = "v")]
    pub volume: f64,
    /// Trade time in Unix epoch milliseconds.
    #[serde(rename = "t")]
    pub timestamp_millis: i64,
}

impl TradeRecord {
    /// Trade time as a UTC timestamp.
    ///
    /// Returns `None` when the epoch value is out of range.
    #[must_use]
    pub fn timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_millis(self.timestamp_millis)
    }

    /// Symbol without its venue prefix.
    #[must_use]
    pub fn display_symbol(&self) -> &str {
        display_symbol(&self.symbol)
    }
}

/// One decoded frame from the upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeEnvelope {
    /// Frame type (`trade`, `ping`, `error`, ...).
    #[serde(rename = "type")]
    pub frame_type: String,
    /// Trade records, in upstream order.
    #[serde(rename = "data", default)]
    pub trades: Vec<TradeRecord>,
    /// Error text on `error` frames.
    #[serde(rename = "msg", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TradeEnvelope {
    /// Create a control frame with no records.
    #[must_use]
    pub fn control(frame_type: impl Into<String>) -> Self {
        Self {
            frame_type: frame_type.into(),
            trades: Vec::new(),
            message: None,
        }
    }

    /// Create a trade frame.
    #[must_use]
    pub fn trades(trades: Vec<TradeRecord>) -> Self {
        Self {
            frame_type: TRADE_FRAME_TYPE.to_string(),
            trades,
            message: None,
        }
    }

    /// Check if this frame carries trades.
    #[must_use]
    pub fn is_trade(&self) -> bool {
        self.frame_type == TRADE_FRAME_TYPE
    }

    /// Records that should reach handlers; empty for non-trade frames.
    #[must_use]
    pub fn dispatchable(&self) -> &[TradeRecord] {
        if self.is_trade() { &self.trades } else { &[] }
    }
}

/// Strip the venue prefix from an instrument identifier.
///
/// `BINANCE:BTCUSDT` becomes `BTCUSDT`; bare tickers are returned unchanged.
#[must_use]
pub fn display_symbol(symbol: &str) -> &str {
    symbol
        .split_once(VENUE_SEPARATOR)
        .map_or(symbol, |(_, pair)| pair)
}

/// Build a venue-qualified crypto pair identifier.
///
/// ```rust
/// use market_stream::domain::trade::crypto_pair;
///
/// assert_eq!(crypto_pair("BINANCE", "BTC", "USDT"), "BINANCE:BTCUSDT");
/// ```
#[must_use]
pub fn crypto_pair(venue: &str, base: &str, quote: &str) -> String {
    format!("{venue}{VENUE_SEPARATOR}{base}{quote}")
}
