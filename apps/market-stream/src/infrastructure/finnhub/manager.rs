//! Connection Manager
//!
//! Owns one upstream socket for one asset class and keeps its subscription
//! alive: connect, subscribe, read, and on any transport failure reconnect
//! with exponential backoff and replay the full subscription set.
//!
//! # Lifecycle
//!
//! ```text
//! connect() ─► subscribe() ─► stream() ──read error──► reconnect protocol
//!                                ▲                          │
//!                                └──── resubscribed ◄───────┘
//! ```
//!
//! Decoding and handler dispatch run inline on the read task, so a slow
//! handler throttles this stream only. `close()` cancels both the read and the
//! backoff sleep; no connect attempt is made after it returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use super::messages::{ERROR_FRAME_TYPE, PING_FRAME_TYPE};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    Credential, MarketStreamer, StreamConnection, StreamError, StreamTransport, TransportError,
};
use crate::application::services::HandlerRegistry;
use crate::domain::session::MarketSession;
use crate::domain::streaming::{AssetClass, ConnectionState, StreamSnapshot};
use crate::domain::subscription::SubscriptionSet;
use crate::domain::trade::TradeRecord;
use crate::infrastructure::config::StreamerConfig;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for one connection manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Upstream WebSocket URL without the token query.
    pub base_url: String,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// Limit for a single connect handshake.
    pub connect_timeout: Duration,
    /// Idle read limit; `None` waits indefinitely.
    pub read_timeout: Option<Duration>,
    /// Trading session checked before subscribing (advisory only).
    pub session: Option<MarketSession>,
}

impl ManagerConfig {
    /// Create a configuration with default timeouts and backoff.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Some(Duration::from_secs(60)),
            session: None,
        }
    }

    /// Create configuration from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &StreamerConfig) -> Self {
        Self {
            base_url: settings.url.clone(),
            reconnect: ReconnectConfig::from_settings(&settings.reconnect),
            connect_timeout: settings.connect_timeout,
            read_timeout: settings.read_timeout,
            session: None,
        }
    }

    /// Warn before subscribing when `session` is closed.
    #[must_use]
    pub const fn with_session(mut self, session: MarketSession) -> Self {
        self.session = Some(session);
        self
    }

    /// Replace the reconnection backoff.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Replace the idle read limit.
    #[must_use]
    pub const fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

// =============================================================================
// Stream Status
// =============================================================================

#[derive(Debug, Default)]
struct StreamStatus {
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    connect_attempts: AtomicU64,
    reconnects: AtomicU64,
    reconnect_attempts: AtomicU32,
    frames_received: AtomicU64,
    trades_dispatched: AtomicU64,
    decode_failures: AtomicU64,
    handler_panics: AtomicU64,
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Resilient stream for one asset class.
pub struct ConnectionManager {
    asset_class: AssetClass,
    config: ManagerConfig,
    url: String,
    subscriptions: SubscriptionSet,
    handlers: HandlerRegistry,
    transport: Arc<dyn StreamTransport>,
    codec: JsonCodec,
    cancel: CancellationToken,
    connection: tokio::sync::Mutex<Option<Box<dyn StreamConnection>>>,
    status: StreamStatus,
}

enum ReadOutcome {
    Cancelled,
    Failed(TransportError),
}

impl ConnectionManager {
    /// Create a manager. Nothing is opened until [`MarketStreamer::connect`].
    #[must_use]
    pub fn new(
        asset_class: AssetClass,
        config: ManagerConfig,
        credential: &Credential,
        subscriptions: SubscriptionSet,
        transport: Arc<dyn StreamTransport>,
    ) -> Self {
        let separator = if config.base_url.contains('?') { '&' } else { '?' };
        let url = format!("{}{separator}token={}", config.base_url, credential.token());

        Self {
            asset_class,
            config,
            url,
            subscriptions,
            handlers: HandlerRegistry::new(),
            transport,
            codec: JsonCodec::new(),
            cancel: CancellationToken::new(),
            connection: tokio::sync::Mutex::new(None),
            status: StreamStatus::default(),
        }
    }

    /// Append a trade handler. Register all handlers before streaming.
    pub fn add_handler<F>(&mut self, handler: F)
    where
        F: Fn(&TradeRecord) + Send + Sync + 'static,
    {
        self.handlers.register(handler);
    }

    /// Subscription set replayed on every connect.
    #[must_use]
    pub const fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    fn set_state(&self, state: ConnectionState) {
        {
            let mut current = self.status.state.write();
            if current.is_closed() {
                return;
            }
            *current = state;
        }

        if state == ConnectionState::Streaming {
            *self.status.last_connected_at.write() = Some(Utc::now());
            self.status.reconnect_attempts.store(0, Ordering::Relaxed);
        }

        metrics::set_connection_state(self.asset_class, state);
        tracing::debug!(asset = %self.asset_class, state = state.as_str(), "State changed");
    }

    async fn open_connection(&self) -> Result<Box<dyn StreamConnection>, TransportError> {
        self.status.connect_attempts.fetch_add(1, Ordering::Relaxed);
        metrics::record_connect_attempt(self.asset_class);

        tracing::info!(
            asset = %self.asset_class,
            url = %self.config.base_url,
            "Connecting to market stream"
        );

        let limit = self.config.connect_timeout;
        tokio::time::timeout(limit, self.transport.connect(&self.url))
            .await
            .unwrap_or(Err(TransportError::Timeout(limit)))
    }

    async fn send_subscriptions(&self, conn: &mut dyn StreamConnection) -> Result<(), StreamError> {
        for (sent, symbol) in self.subscriptions.iter().enumerate() {
            let message = self
                .codec
                .encode_subscribe(symbol)
                .map_err(|e| StreamError::Subscribe {
                    symbol: symbol.clone(),
                    sent,
                    source: TransportError::Send(e.to_string()),
                })?;

            conn.send_text(message)
                .await
                .map_err(|source| StreamError::Subscribe {
                    symbol: symbol.clone(),
                    sent,
                    source,
                })?;

            tracing::info!(asset = %self.asset_class, symbol = %symbol, "Subscribed");
        }
        Ok(())
    }

    fn check_session(&self) {
        let Some(session) = self.config.session else {
            return;
        };

        if session.is_open(Utc::now()) {
            tracing::info!(asset = %self.asset_class, "Market is open");
        } else {
            tracing::warn!(
                asset = %self.asset_class,
                hours = %session.describe(),
                "Market is closed, trades may not arrive until the session opens"
            );
        }
    }

    async fn close_socket(&self, conn: &mut dyn StreamConnection) {
        if let Err(e) = conn.close().await {
            tracing::debug!(asset = %self.asset_class, error = %e, "Error closing socket");
        }
    }

    async fn read_frame(&self, conn: &mut dyn StreamConnection) -> Result<Vec<u8>, TransportError> {
        match self.config.read_timeout {
            Some(limit) => tokio::time::timeout(limit, conn.recv())
                .await
                .unwrap_or(Err(TransportError::Timeout(limit))),
            None => conn.recv().await,
        }
    }

    async fn read_loop(&self, conn: &mut dyn StreamConnection) -> ReadOutcome {
        loop {
            let read = tokio::select! {
                () = self.cancel.cancelled() => None,
                result = self.read_frame(conn) => Some(result),
            };

            match read {
                None => return ReadOutcome::Cancelled,
                Some(Ok(bytes)) => self.handle_frame(&bytes),
                Some(Err(e)) => return ReadOutcome::Failed(e),
            }
        }
    }

    fn handle_frame(&self, bytes: &[u8]) {
        self.status.frames_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_frame_received(self.asset_class);

        let envelope = match self.codec.decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.status.decode_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_decode_failure(self.asset_class);
                tracing::warn!(
                    asset = %self.asset_class,
                    error = %e,
                    len = bytes.len(),
                    "Dropping undecodable frame"
                );
                return;
            }
        };

        match envelope.frame_type.as_str() {
            ERROR_FRAME_TYPE => tracing::warn!(
                asset = %self.asset_class,
                message = envelope.message.as_deref().unwrap_or_default(),
                "Upstream error frame"
            ),
            PING_FRAME_TYPE => tracing::trace!(asset = %self.asset_class, "Ping frame"),
            _ => {}
        }

        let trades = envelope.dispatchable();
        if trades.is_empty() {
            return;
        }

        let started = Instant::now();
        let outcome = self.handlers.dispatch_all(trades);
        metrics::record_dispatch_duration(self.asset_class, started.elapsed());

        let count = u64::try_from(trades.len()).unwrap_or(u64::MAX);
        self.status.trades_dispatched.fetch_add(count, Ordering::Relaxed);
        metrics::record_trades_dispatched(self.asset_class, count);

        if outcome.failed > 0 {
            let failed = u64::try_from(outcome.failed).unwrap_or(u64::MAX);
            self.status.handler_panics.fetch_add(failed, Ordering::Relaxed);
            metrics::record_handler_panics(self.asset_class, failed);
        }
    }

    async fn connect_and_resubscribe(&self) -> Result<Box<dyn StreamConnection>, StreamError> {
        let mut conn = self.open_connection().await.map_err(StreamError::Connect)?;

        if let Err(e) = self.send_subscriptions(conn.as_mut()).await {
            self.close_socket(conn.as_mut()).await;
            return Err(e);
        }

        Ok(conn)
    }

    /// Run the reconnect protocol until a resubscribed connection is ready.
    ///
    /// Returns `Ok(None)` when cancelled.
    async fn reconnect(
        &self,
        policy: &mut ReconnectPolicy,
    ) -> Result<Option<Box<dyn StreamConnection>>, StreamError> {
        self.set_state(ConnectionState::Reconnecting);

        loop {
            let Some(delay) = policy.next_delay() else {
                let attempts = policy.attempt_count();
                tracing::error!(asset = %self.asset_class, attempts, "Reconnect abandoned");
                self.set_state(ConnectionState::Disconnected);
                return Err(StreamError::ReconnectAbandoned(attempts));
            };

            let attempt = policy.attempt_count();
            self.status
                .reconnect_attempts
                .store(attempt, Ordering::Relaxed);

            tracing::info!(
                asset = %self.asset_class,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to market stream"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!(asset = %self.asset_class, "Cancelled during reconnect delay");
                    return Ok(None);
                }
                () = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                () = self.cancel.cancelled() => return Ok(None),
                result = self.connect_and_resubscribe() => result,
            };

            match result {
                Ok(conn) => {
                    policy.reset();
                    self.status.reconnects.fetch_add(1, Ordering::Relaxed);
                    metrics::record_reconnect(self.asset_class);
                    tracing::info!(
                        asset = %self.asset_class,
                        attempt,
                        symbols = self.subscriptions.len(),
                        "Reconnected and resubscribed"
                    );
                    return Ok(Some(conn));
                }
                Err(e) => {
                    tracing::warn!(asset = %self.asset_class, attempt, error = %e, "Reconnect failed");
                }
            }
        }
    }
}

#[async_trait]
impl MarketStreamer for ConnectionManager {
    fn asset_class(&self) -> AssetClass {
        self.asset_class
    }

    fn state(&self) -> ConnectionState {
        *self.status.state.read()
    }

    fn snapshot(&self) -> StreamSnapshot {
        let status = &self.status;
        StreamSnapshot {
            asset_class: self.asset_class,
            state: *status.state.read(),
            symbols: self.subscriptions.len(),
            connect_attempts: status.connect_attempts.load(Ordering::Relaxed),
            reconnects: status.reconnects.load(Ordering::Relaxed),
            reconnect_attempts: status.reconnect_attempts.load(Ordering::Relaxed),
            frames_received: status.frames_received.load(Ordering::Relaxed),
            trades_dispatched: status.trades_dispatched.load(Ordering::Relaxed),
            decode_failures: status.decode_failures.load(Ordering::Relaxed),
            handler_panics: status.handler_panics.load(Ordering::Relaxed),
            last_connected_at: *status.last_connected_at.read(),
        }
    }

    async fn connect(&self) -> Result<(), StreamError> {
        if self.cancel.is_cancelled() {
            return Err(StreamError::Closed);
        }

        self.set_state(ConnectionState::Connecting);

        let stale = self.connection.lock().await.take();
        if let Some(mut stale) = stale {
            self.close_socket(stale.as_mut()).await;
        }

        match self.open_connection().await {
            Ok(mut conn) => {
                let mut slot = self.connection.lock().await;
                if self.cancel.is_cancelled() {
                    drop(slot);
                    self.close_socket(conn.as_mut()).await;
                    return Err(StreamError::Closed);
                }
                *slot = Some(conn);
                drop(slot);

                tracing::info!(asset = %self.asset_class, "Connected to market stream");
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                tracing::warn!(asset = %self.asset_class, error = %e, "Connect failed");
                Err(StreamError::Connect(e))
            }
        }
    }

    async fn subscribe(&self) -> Result<(), StreamError> {
        if self.cancel.is_cancelled() {
            return Err(StreamError::Closed);
        }

        self.check_session();

        let mut guard = self.connection.lock().await;
        let conn = guard.as_mut().ok_or(StreamError::NotConnected)?;
        let sent = self.send_subscriptions(conn.as_mut()).await;
        if let Err(e) = sent {
            if let Some(mut conn) = guard.take() {
                self.close_socket(conn.as_mut()).await;
            }
            drop(guard);
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }
        drop(guard);

        self.set_state(ConnectionState::Subscribed);
        Ok(())
    }

    async fn stream(&self) -> Result<(), StreamError> {
        let mut current = self.connection.lock().await.take();
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                if let Some(mut conn) = current.take() {
                    self.close_socket(conn.as_mut()).await;
                }
                self.set_state(ConnectionState::Closed);
                return Ok(());
            }

            let mut conn = match current.take() {
                Some(conn) => conn,
                None => match self.reconnect(&mut policy).await? {
                    Some(conn) => conn,
                    None => continue,
                },
            };

            self.set_state(ConnectionState::Streaming);
            tracing::info!(asset = %self.asset_class, "Streaming");

            let outcome = self.read_loop(conn.as_mut()).await;
            self.close_socket(conn.as_mut()).await;

            match outcome {
                ReadOutcome::Cancelled => {}
                ReadOutcome::Failed(e) => {
                    tracing::warn!(asset = %self.asset_class, error = %e, "Stream read failed");
                    self.set_state(ConnectionState::Reconnecting);
                }
            }
        }
    }

    async fn close(&self) {
        self.cancel.cancel();

        let idle = self.connection.lock().await.take();
        if let Some(mut conn) = idle {
            self.close_socket(conn.as_mut()).await;
        }

        self.set_state(ConnectionState::Closed);
        tracing::info!(asset = %self.asset_class, "Stream closed");
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("asset_class", &self.asset_class)
            .field("url", &self.config.base_url)
            .field("subscriptions", &self.subscriptions)
            .field("handlers", &self.handlers)
            .field("state", &*self.status.state.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Records sent messages; connects succeed with no inbound frames.
    #[derive(Default)]
    struct RecordingTransport {
        urls: Mutex<Vec<String>>,
        sent: Arc<Mutex<Vec<String>>>,
        fail_send_at: Option<usize>,
    }

    struct RecordingConnection {
        sent: Arc<Mutex<Vec<String>>>,
        fail_send_at: Option<usize>,
        frames: VecDeque<Vec<u8>>,
    }

    #[async_trait]
    impl StreamTransport for RecordingTransport {
        async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>, TransportError> {
            self.urls.lock().push(url.to_string());
            Ok(Box::new(RecordingConnection {
                sent: Arc::clone(&self.sent),
                fail_send_at: self.fail_send_at,
                frames: VecDeque::new(),
            }))
        }
    }

    #[async_trait]
    impl StreamConnection for RecordingConnection {
        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            let mut sent = self.sent.lock();
            if self.fail_send_at == Some(sent.len()) {
                return Err(TransportError::Send("broken pipe".to_string()));
            }
            sent.push(text);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
            self.frames.pop_front().ok_or(TransportError::Closed)
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn manager(transport: Arc<RecordingTransport>, symbols: &[&str]) -> ConnectionManager {
        ConnectionManager::new(
            AssetClass::Stock,
            ManagerConfig::new("wss://ws.finnhub.io"),
            &Credential::new("secret", None),
            SubscriptionSet::new(symbols.iter().copied()),
            transport,
        )
    }

    #[tokio::test]
    async fn connect_appends_token_to_url() {
        let transport = Arc::new(RecordingTransport::default());
        let manager = manager(Arc::clone(&transport), &["AAPL"]);

        manager.connect().await.unwrap();

        assert_eq!(*transport.urls.lock(), vec!["wss://ws.finnhub.io?token=secret"]);
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn subscribe_sends_one_message_per_symbol() {
        let transport = Arc::new(RecordingTransport::default());
        let manager = manager(Arc::clone(&transport), &["AAPL", "MSFT"]);

        manager.connect().await.unwrap();
        manager.subscribe().await.unwrap();

        assert_eq!(
            *transport.sent.lock(),
            vec![
                r#"{"type":"subscribe","symbol":"AAPL"}"#,
                r#"{"type":"subscribe","symbol":"MSFT"}"#,
            ]
        );
        assert_eq!(manager.state(), ConnectionState::Subscribed);
    }

    #[tokio::test]
    async fn subscribe_without_connect_fails() {
        let manager = manager(Arc::new(RecordingTransport::default()), &["AAPL"]);
        let err = manager.subscribe().await.unwrap_err();
        assert!(matches!(err, StreamError::NotConnected));
    }

    #[tokio::test]
    async fn partial_subscribe_reports_failing_symbol() {
        let transport = Arc::new(RecordingTransport {
            fail_send_at: Some(1),
            ..RecordingTransport::default()
        });
        let manager = manager(Arc::clone(&transport), &["AAPL", "MSFT", "GOOGL"]);

        manager.connect().await.unwrap();
        let err = manager.subscribe().await.unwrap_err();

        match err {
            StreamError::Subscribe { symbol, sent, .. } => {
                assert_eq!(symbol, "MSFT");
                assert_eq!(sent, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.sent.lock().len(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(matches!(
            manager.subscribe().await,
            Err(StreamError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_connect() {
        let transport = Arc::new(RecordingTransport::default());
        let manager = manager(Arc::clone(&transport), &["AAPL"]);

        manager.close().await;
        manager.close().await;

        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(matches!(manager.connect().await, Err(StreamError::Closed)));
        assert!(manager.stream().await.is_ok());
        assert!(transport.urls.lock().is_empty());
    }

    #[test]
    fn handle_frame_counts_failures_and_trades() {
        let mut manager = manager(Arc::new(RecordingTransport::default()), &["AAPL"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.add_handler(move |t| sink.lock().push(t.symbol.clone()));

        manager.handle_frame(b"not json");
        manager.handle_frame(br#"{"type":"ping"}"#);
        manager.handle_frame(br#"{"type":"trade","data":[{"p":1.0,"s":"AAPL","t":1,"v":2.0}]}"#);

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.frames_received, 3);
        assert_eq!(snapshot.decode_failures, 1);
        assert_eq!(snapshot.trades_dispatched, 1);
        assert_eq!(*seen.lock(), vec!["AAPL"]);
    }

    #[test]
    fn closed_state_is_terminal() {
        let manager = manager(Arc::new(RecordingTransport::default()), &["AAPL"]);
        manager.set_state(ConnectionState::Closed);
        manager.set_state(ConnectionState::Streaming);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[test]
    fn url_with_existing_query() {
        let manager = ConnectionManager::new(
            AssetClass::Crypto,
            ManagerConfig::new("wss://example.test/ws?v=2"),
            &Credential::new("abc", None),
            SubscriptionSet::default(),
            Arc::new(RecordingTransport::default()),
        );
        assert_eq!(manager.url, "wss://example.test/ws?v=2&token=abc");
    }

    #[test]
    fn debug_output_hides_token() {
        let manager = manager(Arc::new(RecordingTransport::default()), &["AAPL"]);
        let debug = format!("{manager:?}");
        assert!(!debug.contains("secret"));
    }
}
