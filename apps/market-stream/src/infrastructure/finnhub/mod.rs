//! Finnhub WebSocket Adapters
//!
//! Streams trades from Finnhub's WebSocket API:
//!
//! - **Transport**: `tokio-tungstenite` client (TLS, ping/pong)
//! - **Codec**: JSON frames tagged by `type`
//! - **Manager**: connect, subscribe, read, reconnect with backoff
//!
//! One [`ConnectionManager`] per asset class; stocks and crypto pairs share
//! the endpoint but never a socket.

pub mod codec;
pub mod manager;
pub mod messages;
pub mod reconnect;
pub mod websocket;

pub use codec::{CodecError, JsonCodec};
pub use manager::{ConnectionManager, ManagerConfig};
pub use messages::{ControlAction, ControlRequest};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use websocket::TungsteniteTransport;
