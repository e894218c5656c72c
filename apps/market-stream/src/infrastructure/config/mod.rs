//! Configuration Module
//!
//! Configuration loading for the market streamer.

mod settings;

pub use settings::{
    ApiKey, ConfigError, DEFAULT_CRYPTO_SYMBOLS, DEFAULT_STOCK_SYMBOLS, DEFAULT_STREAM_URL,
    ReconnectSettings, StreamerConfig,
};
