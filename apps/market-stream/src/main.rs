//! Market Stream Binary
//!
//! Streams live stock and crypto trades and prints them to stdout.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FINNHUB_API_KEY`: Finnhub API key
//!
//! ## Optional
//! - `STREAM_URL`: Upstream WebSocket URL (default: wss://ws.finnhub.io)
//! - `STREAM_STOCK_SYMBOLS`: Comma-separated tickers (default: AAPL,MSFT,GOOGL)
//! - `STREAM_CRYPTO_SYMBOLS`: Comma-separated pairs (default: BINANCE:BTCUSDT,BINANCE:ETHUSDT,BINANCE:BNBUSDT)
//! - `STREAM_RECONNECT_DELAY_INITIAL_MS`: First reconnect delay (default: 1000)
//! - `STREAM_RECONNECT_DELAY_MAX_SECS`: Reconnect delay ceiling (default: 30)
//! - `STREAM_MAX_RECONNECT_ATTEMPTS`: 0 = retry forever (default: 0)
//! - `STREAM_STARTUP_CONNECT_ATTEMPTS`: Startup connect attempts (default: 3)
//! - `STREAM_FAILURE_POLICY`: shutdown | isolate (default: shutdown)
//! - `STREAM_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use market_stream::infrastructure::health::{HealthServer, HealthServerState};
use market_stream::infrastructure::telemetry;
use market_stream::{
    AccountSelector, AssetClass, ConnectionManager, CredentialCache, MarketCoordinator,
    MarketSession, MarketStreamer, ManagerConfig, StartupConfig, StaticCredentialSource,
    StreamTransport, StreamerConfig, TradeRecord, TungsteniteTransport, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Account the API key is provisioned for.
const FINNHUB_ACCOUNT: &str = "finnhub";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting market stream");

    let _metrics_handle = init_metrics()?;

    let config = StreamerConfig::from_env()?;
    log_config(&config);

    let account = AccountSelector::new(FINNHUB_ACCOUNT);
    let credentials = CredentialCache::new(
        StaticCredentialSource::new(account.clone(), config.api_key.expose()),
        config.credential_ttl,
    );
    let credential = credentials.get(&account).await?;

    let transport: Arc<dyn StreamTransport> = Arc::new(TungsteniteTransport::new());
    let manager_config = ManagerConfig::from_settings(&config);

    let mut stock = ConnectionManager::new(
        AssetClass::Stock,
        manager_config
            .clone()
            .with_session(MarketSession::us_equities()),
        &credential,
        config.stock_symbols.clone(),
        Arc::clone(&transport),
    );
    stock.add_handler(print_trade(AssetClass::Stock));

    let mut crypto = ConnectionManager::new(
        AssetClass::Crypto,
        manager_config,
        &credential,
        config.crypto_symbols.clone(),
        Arc::clone(&transport),
    );
    crypto.add_handler(print_trade(AssetClass::Crypto));

    let mut coordinator = MarketCoordinator::new(
        config.failure_policy,
        StartupConfig {
            attempts: config.startup_connect_attempts,
            retry_delay: config.reconnect.delay_initial,
        },
    )
    .with_shutdown_timeout(SHUTDOWN_TIMEOUT);

    for manager in [stock, crypto] {
        if manager.subscriptions().is_empty() {
            tracing::warn!(asset = %manager.asset_class(), "No symbols configured, skipping");
            continue;
        }
        coordinator.add_stream(Arc::new(manager));
    }

    let shutdown_token = CancellationToken::new();

    if config.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            coordinator.streams().to_vec(),
        ));
        let health_server =
            HealthServer::new(config.health_port, health_state, shutdown_token.clone());

        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    if let Err(e) = coordinator.start().await {
        shutdown_token.cancel();
        return Err(e.into());
    }

    tracing::info!(
        stocks = ?config.stock_symbols.as_slice(),
        crypto = ?config.crypto_symbols.as_slice(),
        "Streams running, waiting for market data"
    );

    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let result = coordinator.run(shutdown_token.clone().cancelled_owned()).await;
    shutdown_token.cancel();

    tracing::info!("Market stream stopped");
    result.map_err(Into::into)
}

/// Build the stdout trade handler for one asset class.
fn print_trade(asset: AssetClass) -> impl Fn(&TradeRecord) + Send + Sync + 'static {
    move |trade: &TradeRecord| println!("{}", format_trade(asset, trade))
}

/// `[HH:MM:SS] <asset> <symbol>: $<price>, Volume: <volume>` in local time.
fn format_trade(asset: AssetClass, trade: &TradeRecord) -> String {
    let time = trade.timestamp().map_or_else(
        || "--:--:--".to_string(),
        |ts| ts.with_timezone(&chrono::Local).format("%H:%M:%S").to_string(),
    );

    format!(
        "[{time}] {asset} {}: ${:.2}, Volume: {:.4}",
        trade.display_symbol(),
        trade.price,
        trade.volume
    )
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamerConfig) {
    tracing::info!(
        url = %config.url,
        stock_symbols = config.stock_symbols.len(),
        crypto_symbols = config.crypto_symbols.len(),
        failure_policy = config.failure_policy.as_str(),
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        delay_initial_ms = u64::try_from(config.reconnect.delay_initial.as_millis()).unwrap_or(u64::MAX),
        delay_max_secs = config.reconnect.delay_max.as_secs(),
        max_attempts = config.reconnect.max_attempts,
        connect_timeout_secs = config.connect_timeout.as_secs(),
        read_timeout_secs = config.read_timeout.map(|t| t.as_secs()),
        "Reconnect settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_symbol_loses_venue() {
        let trade = TradeRecord {
            symbol: "BINANCE:BTCUSDT".to_string(),
            price: 64_250.5,
            volume: 0.012_34,
            timestamp_millis: 1_700_000_000_000,
        };

        let line = format_trade(AssetClass::Crypto, &trade);

        assert!(line.ends_with("crypto BTCUSDT: $64250.50, Volume: 0.0123"), "{line}");
        assert!(line.starts_with('['));
    }
}
