//! WebSocket Transport
//!
//! [`StreamTransport`] adapter over `tokio-tungstenite`. Ping frames are
//! answered inline and never reach the caller; text and binary frames are
//! surfaced as raw bytes for the codec.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{StreamConnection, StreamTransport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens TLS WebSocket connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    /// Create a new transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StreamTransport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>, TransportError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (write, read) = ws_stream.split();

        Ok(Box::new(WebSocketConnection {
            write,
            read,
            closed: false,
        }))
    }
}

/// One open WebSocket.
struct WebSocketConnection {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    closed: bool,
}

#[async_trait]
impl StreamConnection for WebSocketConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_bytes().to_vec()),
                Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                Some(Ok(Message::Ping(data))) => {
                    self.write
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| TransportError::Send(e.to_string()))?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "Server sent close frame");
                    return Err(TransportError::Closed);
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => return Err(TransportError::Receive(e.to_string())),
                None => return Err(TransportError::Closed),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.write
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}
