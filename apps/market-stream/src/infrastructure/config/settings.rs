//! Streamer Configuration Settings
//!
//! Configuration types for the market streamer, loaded from environment
//! variables.

use std::time::Duration;

use crate::application::services::FailurePolicy;
use crate::domain::subscription::SubscriptionSet;

/// Default upstream endpoint.
pub const DEFAULT_STREAM_URL: &str = "wss://ws.finnhub.io";

/// Default equity subscriptions.
pub const DEFAULT_STOCK_SYMBOLS: &str = "AAPL,MSFT,GOOGL";

/// Default crypto subscriptions.
pub const DEFAULT_CRYPTO_SYMBOLS: &str = "BINANCE:BTCUSDT,BINANCE:ETHUSDT,BINANCE:BNBUSDT";

/// Finnhub API key.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap an API key.
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// Get the API key.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Reconnection backoff settings.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Jitter as a fraction of the delay (0.0 = none).
    pub jitter_factor: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_secs(1),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0, // Unlimited
        }
    }
}

/// Complete streamer configuration.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Upstream API key, used as the stream credential.
    pub api_key: ApiKey,
    /// Upstream WebSocket URL without the token query.
    pub url: String,
    /// Equity subscriptions.
    pub stock_symbols: SubscriptionSet,
    /// Crypto subscriptions.
    pub crypto_symbols: SubscriptionSet,
    /// Reconnection backoff.
    pub reconnect: ReconnectSettings,
    /// Connect attempts at startup before giving up.
    pub startup_connect_attempts: u32,
    /// Connect handshake limit.
    pub connect_timeout: Duration,
    /// Idle read limit (`None` = wait indefinitely).
    pub read_timeout: Option<Duration>,
    /// What to do when one stream fails permanently.
    pub failure_policy: FailurePolicy,
    /// Credential cache lifetime.
    pub credential_ttl: Duration,
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl StreamerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `FINNHUB_API_KEY` is missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("FINNHUB_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("FINNHUB_API_KEY".to_string()))?;

        if api_key.trim().is_empty() {
            return Err(ConfigError::EmptyValue("FINNHUB_API_KEY".to_string()));
        }

        let env = EnvReader { lookup: &lookup };
        let defaults = ReconnectSettings::default();

        let reconnect = ReconnectSettings {
            delay_initial: env.duration_millis(
                "STREAM_RECONNECT_DELAY_INITIAL_MS",
                defaults.delay_initial,
            ),
            delay_max: env.duration_secs("STREAM_RECONNECT_DELAY_MAX_SECS", defaults.delay_max),
            delay_multiplier: env.parse(
                "STREAM_RECONNECT_DELAY_MULTIPLIER",
                defaults.delay_multiplier,
            ),
            jitter_factor: env.parse("STREAM_RECONNECT_JITTER", defaults.jitter_factor),
            max_attempts: env.parse("STREAM_MAX_RECONNECT_ATTEMPTS", defaults.max_attempts),
        };

        let read_timeout = env.duration_secs("STREAM_READ_TIMEOUT_SECS", Duration::from_secs(60));

        Ok(Self {
            api_key: ApiKey::new(api_key),
            url: lookup("STREAM_URL").unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
            stock_symbols: SubscriptionSet::from_csv(
                &lookup("STREAM_STOCK_SYMBOLS").unwrap_or_else(|| DEFAULT_STOCK_SYMBOLS.to_string()),
            ),
            crypto_symbols: SubscriptionSet::from_csv(
                &lookup("STREAM_CRYPTO_SYMBOLS")
                    .unwrap_or_else(|| DEFAULT_CRYPTO_SYMBOLS.to_string()),
            ),
            reconnect,
            startup_connect_attempts: env.parse::<u32>("STREAM_STARTUP_CONNECT_ATTEMPTS", 3).max(1),
            connect_timeout: env
                .duration_secs("STREAM_CONNECT_TIMEOUT_SECS", Duration::from_secs(10)),
            read_timeout: (!read_timeout.is_zero()).then_some(read_timeout),
            failure_policy: lookup("STREAM_FAILURE_POLICY")
                .map(|s| FailurePolicy::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            credential_ttl: env
                .duration_secs("STREAM_CREDENTIAL_TTL_SECS", Duration::from_secs(3600)),
            health_port: env.parse("STREAM_HEALTH_PORT", 8083),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<StreamerConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        StreamerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn missing_api_key() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(k) if k == "FINNHUB_API_KEY"));
    }

    #[test]
    fn empty_api_key() {
        let err = load(&[("FINNHUB_API_KEY", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }

    #[test]
    fn defaults() {
        let config = load(&[("FINNHUB_API_KEY", "key")]).unwrap();

        assert_eq!(config.url, "wss://ws.finnhub.io");
        assert_eq!(config.stock_symbols.as_slice(), ["AAPL", "MSFT", "GOOGL"]);
        assert_eq!(
            config.crypto_symbols.as_slice(),
            ["BINANCE:BTCUSDT", "BINANCE:ETHUSDT", "BINANCE:BNBUSDT"]
        );
        assert_eq!(config.reconnect.delay_initial, Duration::from_secs(1));
        assert_eq!(config.reconnect.delay_max, Duration::from_secs(30));
        assert_eq!(config.reconnect.max_attempts, 0);
        assert_eq!(config.startup_connect_attempts, 3);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.read_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.failure_policy, FailurePolicy::Shutdown);
        assert_eq!(config.credential_ttl, Duration::from_secs(3600));
        assert_eq!(config.health_port, 8083);
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("FINNHUB_API_KEY", "key"),
            ("STREAM_STOCK_SYMBOLS", "TSLA, NVDA"),
            ("STREAM_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("STREAM_MAX_RECONNECT_ATTEMPTS", "12"),
            ("STREAM_READ_TIMEOUT_SECS", "0"),
            ("STREAM_FAILURE_POLICY", "ISOLATE"),
            ("STREAM_HEALTH_PORT", "0"),
        ])
        .unwrap();

        assert_eq!(config.stock_symbols.as_slice(), ["TSLA", "NVDA"]);
        assert_eq!(config.reconnect.delay_initial, Duration::from_millis(250));
        assert_eq!(config.reconnect.max_attempts, 12);
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.failure_policy, FailurePolicy::Isolate);
        assert_eq!(config.health_port, 0);
    }

    #[test]
    fn unparsable_values_fall_back() {
        let config = load(&[
            ("FINNHUB_API_KEY", "key"),
            ("STREAM_RECONNECT_DELAY_MULTIPLIER", "fast"),
            ("STREAM_STARTUP_CONNECT_ATTEMPTS", "0"),
        ])
        .unwrap();

        assert!((config.reconnect.delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.startup_connect_attempts, 1);
    }

    #[test]
    fn api_key_redacted_debug() {
        let config = load(&[("FINNHUB_API_KEY", "key123")]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("key123"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(config.api_key.expose(), "key123");
    }
}
