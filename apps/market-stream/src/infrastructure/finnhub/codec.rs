//! Stream Codec Module
//!
//! JSON encoding and decoding for the Finnhub trade stream.
//!
//! Inbound frames are JSON objects tagged by `type`. Only `trade` frames have
//! their `data` array decoded; other frame types are returned as control
//! envelopes without inspecting the payload, so unknown control frames added
//! upstream decode cleanly and dispatch nothing.

use crate::domain::trade::{TRADE_FRAME_TYPE, TradeEnvelope, TradeRecord};
use crate::infrastructure::finnhub::messages::ControlRequest;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame has no string `type` field.
    #[error("frame has no type field")]
    MissingType,

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the trade stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one inbound frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a JSON object with a `type`
    /// field, or if a `trade` frame carries malformed records.
    pub fn decode(&self, bytes: &[u8]) -> Result<TradeEnvelope, CodecError> {
        let mut value: serde_json::Value = serde_json::from_slice(bytes)?;

        let found = kind(&value);
        let object = value.as_object_mut().ok_or_else(|| {
            CodecError::InvalidFormat(format!("expected JSON object, got {found}"))
        })?;

        let frame_type = object
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(CodecError::MissingType)?
            .to_string();

        if frame_type != TRADE_FRAME_TYPE {
            let mut envelope = TradeEnvelope::control(frame_type);
            envelope.message = object
                .get("msg")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string);
            return Ok(envelope);
        }

        let trades: Vec<TradeRecord> = match object.remove("data") {
            Some(serde_json::Value::Null) | None => Vec::new(),
            Some(data) => serde_json::from_value(data)?,
        };

        Ok(TradeEnvelope::trades(trades))
    }

    /// Encode the subscribe control message for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_subscribe(&self, symbol: &str) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&ControlRequest::subscribe(symbol))?)
    }
}

const fn kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
