//! Multi-Market Coordinator
//!
//! Starts one stream per asset class, runs each read loop on its own task and
//! tears everything down on the external shutdown signal.
//!
//! # Failure Policy
//!
//! A stream whose `stream()` returns an error (reconnect abandoned) or whose
//! task panics is handled according to [`FailurePolicy`]:
//!
//! - `Shutdown`: close every stream and return the error.
//! - `Isolate`: log it and keep the remaining streams running.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, try_join_all};
use tokio::task::JoinSet;

use crate::application::ports::{MarketStreamer, StreamError};
use crate::domain::streaming::AssetClass;

/// Default time allowed for stream tasks to exit after shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Policy and Configuration
// =============================================================================

/// What the coordinator does when one stream fails permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Close every stream and surface the error.
    #[default]
    Shutdown,
    /// Keep the other streams running.
    Isolate,
}

impl FailurePolicy {
    /// Parse a known policy name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "shutdown" => Some(Self::Shutdown),
            "isolate" => Some(Self::Isolate),
            _ => None,
        }
    }

    /// Parse a policy from string, warning and falling back to the default
    /// on an unknown name.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            tracing::warn!(value = s, fallback = "shutdown", "Unknown failure policy");
            Self::default()
        })
    }

    /// Get the policy name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::Isolate => "isolate",
        }
    }
}

/// Startup connect behavior.
#[derive(Debug, Clone, Copy)]
pub struct StartupConfig {
    /// Connect + subscribe attempts per stream before startup fails.
    pub attempts: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Coordinator errors.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// A stream could not connect and subscribe at startup.
    #[error("{asset} stream failed to start: {source}")]
    Startup {
        /// Asset class of the failed stream.
        asset: AssetClass,
        /// Last startup error.
        #[source]
        source: StreamError,
    },

    /// A running stream gave up.
    #[error("{asset} stream failed: {source}")]
    StreamFailed {
        /// Asset class of the failed stream.
        asset: AssetClass,
        /// Error returned by the read loop.
        #[source]
        source: StreamError,
    },

    /// A stream task panicked.
    #[error("{asset} stream task panicked: {message}")]
    TaskPanicked {
        /// Asset class of the failed stream.
        asset: AssetClass,
        /// Join error text.
        message: String,
    },
}

impl CoordinatorError {
    /// Asset class the error belongs to.
    #[must_use]
    pub const fn asset(&self) -> AssetClass {
        match self {
            Self::Startup { asset, .. }
            | Self::StreamFailed { asset, .. }
            | Self::TaskPanicked { asset, .. } => *asset,
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Runs a set of independent market streams.
pub struct MarketCoordinator {
    streams: Vec<Arc<dyn MarketStreamer>>,
    policy: FailurePolicy,
    startup: StartupConfig,
    shutdown_timeout: Duration,
}

impl MarketCoordinator {
    /// Create a coordinator with no streams.
    #[must_use]
    pub const fn new(policy: FailurePolicy, startup: StartupConfig) -> Self {
        Self {
            streams: Vec::new(),
            policy,
            startup,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }

    /// Add a stream.
    pub fn add_stream(&mut self, stream: Arc<dyn MarketStreamer>) {
        self.streams.push(stream);
    }

    /// Override the shutdown timeout.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Managed streams.
    #[must_use]
    pub fn streams(&self) -> &[Arc<dyn MarketStreamer>] {
        &self.streams
    }

    /// Connect and subscribe every stream concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first stream that could not start within the configured
    /// attempts. All streams are closed in that case.
    pub async fn start(&self) -> Result<(), CoordinatorError> {
        let starts = self.streams.iter().map(|stream| self.start_one(stream.as_ref()));

        if let Err(e) = try_join_all(starts).await {
            tracing::error!(asset = %e.asset(), error = %e, "Startup failed");
            self.close_all().await;
            return Err(e);
        }

        tracing::info!(streams = self.streams.len(), "All streams started");
        Ok(())
    }

    async fn start_one(&self, stream: &dyn MarketStreamer) -> Result<(), CoordinatorError> {
        let asset = stream.asset_class();
        let attempts = self.startup.attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = match stream.connect().await {
                Ok(()) => stream.subscribe().await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    tracing::info!(asset = %asset, attempt, "Stream started");
                    return Ok(());
                }
                Err(source) if attempt >= attempts || matches!(source, StreamError::Closed) => {
                    return Err(CoordinatorError::Startup { asset, source });
                }
                Err(e) => {
                    tracing::warn!(
                        asset = %asset,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Startup attempt failed"
                    );
                    tokio::time::sleep(self.startup.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run every stream until `shutdown` resolves or the failure policy
    /// stops the coordinator.
    ///
    /// Streams are closed and their tasks awaited (up to the shutdown
    /// timeout) before returning.
    ///
    /// # Errors
    ///
    /// Under [`FailurePolicy::Shutdown`], returns the first stream failure.
    /// Under [`FailurePolicy::Isolate`], returns the last failure only if
    /// every stream has failed.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), CoordinatorError>
    where
        F: Future<Output = ()>,
    {
        let mut tasks = JoinSet::new();
        let mut assets = HashMap::new();

        for stream in &self.streams {
            let stream = Arc::clone(stream);
            let asset = stream.asset_class();
            let handle = tasks.spawn(async move { stream.stream().await });
            assets.insert(handle.id(), asset);
        }

        tracing::info!(
            streams = self.streams.len(),
            policy = self.policy.as_str(),
            "Coordinator running"
        );

        tokio::pin!(shutdown);
        let mut failure = None;

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    failure = None;
                    break;
                }
                joined = tasks.join_next_with_id() => {
                    let error = match joined {
                        None => break,
                        Some(Ok((id, Ok(())))) => {
                            tracing::info!(asset = ?assets.get(&id), "Stream exited");
                            continue;
                        }
                        Some(Ok((id, Err(source)))) => CoordinatorError::StreamFailed {
                            asset: lookup_asset(&assets, id),
                            source,
                        },
                        Some(Err(join_error)) => CoordinatorError::TaskPanicked {
                            asset: lookup_asset(&assets, join_error.id()),
                            message: join_error.to_string(),
                        },
                    };

                    tracing::error!(asset = %error.asset(), error = %error, "Stream failed");
                    failure = Some(error);

                    if self.policy == FailurePolicy::Shutdown {
                        break;
                    }
                }
            }
        }

        self.close_all().await;

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "Stream task ended abnormally during shutdown");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                timeout_secs = self.shutdown_timeout.as_secs(),
                "Stream tasks did not exit in time, aborting"
            );
            tasks.abort_all();
        }

        tracing::info!("Coordinator stopped");
        failure.map_or(Ok(()), Err)
    }

    /// Close every stream.
    pub async fn close_all(&self) {
        join_all(self.streams.iter().map(|stream| stream.close())).await;
    }
}

fn lookup_asset(assets: &HashMap<tokio::task::Id, AssetClass>, id: tokio::task::Id) -> AssetClass {
    assets.get(&id).copied().unwrap_or(AssetClass::Stock)
}

impl std::fmt::Debug for MarketCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketCoordinator")
            .field(
                "streams",
                &self.streams.iter().map(|s| s.asset_class()).collect::<Vec<_>>(),
            )
            .field("policy", &self.policy)
            .field("startup", &self.startup)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_policy_parsing() {
        assert_eq!(
            FailurePolicy::from_str_case_insensitive("isolate"),
            FailurePolicy::Isolate
        );
        assert_eq!(
            FailurePolicy::from_str_case_insensitive(" ISOLATE "),
            FailurePolicy::Isolate
        );
        assert_eq!(
            FailurePolicy::from_str_case_insensitive("shutdown"),
            FailurePolicy::Shutdown
        );
        assert_eq!(
            FailurePolicy::from_str_case_insensitive("unknown"),
            FailurePolicy::Shutdown
        );
        assert_eq!(FailurePolicy::default(), FailurePolicy::Shutdown);
    }

    #[test]
    fn failure_policy_rejects_unknown_names() {
        assert_eq!(FailurePolicy::parse("isolat"), None);
        assert_eq!(FailurePolicy::parse(""), None);
        assert_eq!(FailurePolicy::parse("Isolate"), Some(FailurePolicy::Isolate));
    }

    #[test]
    fn startup_defaults() {
        let startup = StartupConfig::default();
        assert_eq!(startup.attempts, 3);
        assert_eq!(startup.retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn error_reports_asset() {
        let err = CoordinatorError::StreamFailed {
            asset: AssetClass::Crypto,
            source: StreamError::ReconnectAbandoned(5),
        };
        assert_eq!(err.asset(), AssetClass::Crypto);
        assert_eq!(
            err.to_string(),
            "crypto stream failed: reconnect abandoned after 5 attempts"
        );
    }
}
