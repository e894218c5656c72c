//! Scripted in-memory transport for integration tests.
//!
//! Each `connect` pops the next [`Dial`] from the script. Once the script is
//! exhausted every further dial fails, which keeps a manager in its
//! reconnect loop.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use market_stream::{
    AssetClass, ConnectionManager, Credential, ManagerConfig, ReconnectConfig, StreamConnection,
    StreamTransport, SubscriptionSet, TransportError,
};

/// One scripted `connect` result.
pub enum Dial {
    /// Handshake fails.
    Refuse,
    /// Handshake succeeds and the socket replays `Vec<Read>`, then idles.
    Accept(Vec<Read>),
    /// Handshake succeeds but the first `send` fails.
    BrokenPipe,
    /// Handshake takes `Duration`, then behaves like `Accept`.
    Slow(Duration, Vec<Read>),
}

/// One scripted `recv` result.
pub enum Read {
    /// A text frame.
    Frame(Vec<u8>),
    /// A transport error.
    Fail,
}

struct Dialed {
    at: Instant,
    url: String,
    closed_before: usize,
}

#[derive(Default)]
struct Shared {
    script: Mutex<VecDeque<Dial>>,
    dials: Mutex<Vec<Dialed>>,
    sessions: Mutex<Vec<Arc<Mutex<Vec<String>>>>>,
    closed: Mutex<usize>,
}

/// Fake transport recording dial instants and per-connection writes.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    shared: Arc<Shared>,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = Dial>) -> Self {
        let transport = Self::default();
        transport.shared.script.lock().extend(script);
        transport
    }

    /// Number of `connect` calls so far.
    pub fn dial_count(&self) -> usize {
        self.shared.dials.lock().len()
    }

    /// Clock instants of every `connect` call.
    pub fn dial_instants(&self) -> Vec<Instant> {
        self.shared.dials.lock().iter().map(|d| d.at).collect()
    }

    /// URLs passed to `connect`.
    pub fn dial_urls(&self) -> Vec<String> {
        self.shared.dials.lock().iter().map(|d| d.url.clone()).collect()
    }

    /// Sockets already closed by the client when each dial started.
    pub fn closed_at_each_dial(&self) -> Vec<usize> {
        self.shared.dials.lock().iter().map(|d| d.closed_before).collect()
    }

    /// Gaps between consecutive dials, rounded to whole seconds.
    pub fn dial_gaps_secs(&self) -> Vec<u64> {
        self.dial_instants()
            .windows(2)
            .map(|w| {
                let gap = w[1] - w[0];
                u64::try_from((gap.as_millis() + 500) / 1000).unwrap()
            })
            .collect()
    }

    /// Text written on each accepted connection, in accept order.
    pub fn sessions(&self) -> Vec<Vec<String>> {
        self.shared
            .sessions
            .lock()
            .iter()
            .map(|session| session.lock().clone())
            .collect()
    }

    /// Number of connections closed by the client.
    pub fn closed_count(&self) -> usize {
        *self.shared.closed.lock()
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>, TransportError> {
        let closed_before = *self.shared.closed.lock();
        self.shared.dials.lock().push(Dialed {
            at: Instant::now(),
            url: url.to_string(),
            closed_before,
        });

        let dial = self.shared.script.lock().pop_front().unwrap_or(Dial::Refuse);
        let (reads, broken) = match dial {
            Dial::Refuse => return Err(TransportError::Connect("connection refused".into())),
            Dial::Accept(reads) => (reads, false),
            Dial::BrokenPipe => (Vec::new(), true),
            Dial::Slow(delay, reads) => {
                tokio::time::sleep(delay).await;
                (reads, false)
            }
        };

        let written = Arc::new(Mutex::new(Vec::new()));
        self.shared.sessions.lock().push(Arc::clone(&written));

        Ok(Box::new(ScriptedConnection {
            reads: reads.into(),
            written,
            broken,
            shared: Arc::clone(&self.shared),
            closed: false,
        }))
    }
}

struct ScriptedConnection {
    reads: VecDeque<Read>,
    written: Arc<Mutex<Vec<String>>>,
    broken: bool,
    shared: Arc<Shared>,
    closed: bool,
}

#[async_trait]
impl StreamConnection for ScriptedConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.broken {
            return Err(TransportError::Send("broken pipe".into()));
        }
        self.written.lock().push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        match self.reads.pop_front() {
            Some(Read::Frame(bytes)) => Ok(bytes),
            Some(Read::Fail) => Err(TransportError::Receive("connection reset".into())),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            *self.shared.closed.lock() += 1;
        }
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Manager config with no idle read limit and default backoff.
pub fn config() -> ManagerConfig {
    ManagerConfig::new("wss://ws.test.local").with_read_timeout(None)
}

/// Manager config that gives up after `attempts` reconnects.
pub fn limited_config(attempts: u32) -> ManagerConfig {
    config().with_reconnect(ReconnectConfig::default().limited(attempts))
}

pub fn manager(
    asset: AssetClass,
    symbols: &[&str],
    config: ManagerConfig,
    transport: &ScriptedTransport,
) -> ConnectionManager {
    ConnectionManager::new(
        asset,
        config,
        &Credential::new("test-token", None),
        SubscriptionSet::new(symbols.iter().copied()),
        Arc::new(transport.clone()),
    )
}

/// A trade frame carrying `(symbol, price)` records.
pub fn trade_frame(trades: &[(&str, f64)]) -> Vec<u8> {
    let data: Vec<_> = trades
        .iter()
        .map(|(symbol, price)| {
            serde_json::json!({ "s": symbol, "p": price, "v": 1.5, "t": 1_700_000_000_000_i64 })
        })
        .collect();
    serde_json::json!({ "type": "trade", "data": data })
        .to_string()
        .into_bytes()
}

/// Subscribe message expected on the wire for `symbol`.
pub fn subscribe_message(symbol: &str) -> String {
    format!(r#"{{"type":"subscribe","symbol":"{symbol}"}}"#)
}

/// Let spawned tasks run for `secs` of (paused) virtual time.
pub async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}
