//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StreamTransport` / `StreamConnection`: duplex message transport to the
//!   upstream quote provider
//! - `CredentialSource`: issues bearer tokens for an account
//!
//! ## Driver Ports (Inbound)
//!
//! - `MarketStreamer`: one resilient stream, driven by the coordinator

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::streaming::{AssetClass, ConnectionState, StreamSnapshot};

// =============================================================================
// Transport
// =============================================================================

/// Errors raised by a stream transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Opening the connection failed (DNS, TLS, handshake).
    #[error("connect failed: {0}")]
    Connect(String),

    /// Operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Sending a message failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Receiving a message failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// Remote side closed the connection.
    #[error("connection closed by remote")]
    Closed,
}

/// Opens connections to the upstream.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a new connection to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>, TransportError>;
}

/// One open duplex connection.
///
/// Implementations answer transport-level keepalives themselves; only data
/// frames are surfaced through [`StreamConnection::recv`].
#[async_trait]
pub trait StreamConnection: Send {
    /// Send a text message.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next data frame.
    ///
    /// Returns [`TransportError::Closed`] when the remote closes the stream.
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Close the connection. Must be safe to call more than once.
    async fn close(&mut self) -> Result<(), TransportError>;
}

// =============================================================================
// Credentials
// =============================================================================

/// Account whose credential is requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountSelector(String);

impl AccountSelector {
    /// Create a selector.
    #[must_use]
    pub fn new(account: impl Into<String>) -> Self {
        Self(account.into())
    }

    /// Get the account name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque bearer credential.
#[derive(Clone)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Create a credential.
    #[must_use]
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Get the token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Expiry reported by the issuer, if any.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Errors raised by a credential source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    /// The source cannot issue credentials for this account. Never retried.
    #[error("unsupported account: {0}")]
    UnsupportedAccount(String),

    /// Fetching the credential failed.
    #[error("credential fetch failed: {0}")]
    FetchFailed(String),
}

/// Issues credentials for accounts.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Fetch a fresh credential for `account`.
    async fn fetch(&self, account: &AccountSelector) -> Result<Credential, CredentialError>;
}

// =============================================================================
// Market Streamer
// =============================================================================

/// Errors surfaced by a market stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Opening the transport failed.
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),

    /// A subscribe message could not be sent. Symbols before `symbol` were sent.
    #[error("error subscribing to symbol {symbol} after {sent} sent: {source}")]
    Subscribe {
        /// Symbol whose subscribe message failed.
        symbol: String,
        /// Number of subscribe messages sent before the failure.
        sent: usize,
        /// Underlying transport error.
        #[source]
        source: TransportError,
    },

    /// Operation requires an open transport.
    #[error("not connected")]
    NotConnected,

    /// The stream has been closed.
    #[error("stream closed")]
    Closed,

    /// Reconnect attempts exhausted.
    #[error("reconnect abandoned after {0} attempts")]
    ReconnectAbandoned(u32),
}

/// One resilient market data stream.
#[async_trait]
pub trait MarketStreamer: Send + Sync {
    /// Asset class served by this stream.
    fn asset_class(&self) -> AssetClass;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Current state and counters.
    fn snapshot(&self) -> StreamSnapshot;

    /// Open the transport. Fails fast without retrying.
    async fn connect(&self) -> Result<(), StreamError>;

    /// Send the subscribe sequence on the open transport.
    async fn subscribe(&self) -> Result<(), StreamError>;

    /// Run the read loop until closed.
    async fn stream(&self) -> Result<(), StreamError>;

    /// Close the stream. Idempotent.
    async fn close(&self);
}
