//! Prometheus Metrics Module
//!
//! Exposes stream metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: frames received, trades dispatched, decode failures
//! - **Handlers**: handler panics
//! - **Connections**: connect attempts, reconnects, connection state
//! - **Latency**: per-frame dispatch time
//!
//! All metrics carry an `asset` label (`stock`, `crypto`).
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::{AssetClass, ConnectionState};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frame counters
    describe_counter!(
        "market_stream_frames_received_total",
        "Total frames read from the upstream"
    );
    describe_counter!(
        "market_stream_trades_dispatched_total",
        "Total trade records dispatched to handlers"
    );
    describe_counter!(
        "market_stream_decode_failures_total",
        "Total frames dropped because they failed to decode"
    );
    describe_counter!(
        "market_stream_handler_panics_total",
        "Total handler invocations that panicked"
    );

    // Connection counters
    describe_counter!(
        "market_stream_connect_attempts_total",
        "Total transport connect attempts"
    );
    describe_counter!(
        "market_stream_reconnects_total",
        "Total successful reconnects"
    );

    describe_gauge!(
        "market_stream_connection_state",
        "Connection state (0=disconnected 1=connecting 2=subscribed 3=streaming 4=reconnecting 5=closed)"
    );

    describe_histogram!(
        "market_stream_dispatch_seconds",
        "Time to dispatch one trade frame to all handlers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame read from the upstream.
pub fn record_frame_received(asset: AssetClass) {
    counter!("market_stream_frames_received_total", "asset" => asset.as_str()).increment(1);
}

/// Record trade records dispatched to handlers.
pub fn record_trades_dispatched(asset: AssetClass, count: u64) {
    counter!("market_stream_trades_dispatched_total", "asset" => asset.as_str()).increment(count);
}

/// Record a frame that failed to decode.
pub fn record_decode_failure(asset: AssetClass) {
    counter!("market_stream_decode_failures_total", "asset" => asset.as_str()).increment(1);
}

/// Record panicking handler invocations.
pub fn record_handler_panics(asset: AssetClass, count: u64) {
    counter!("market_stream_handler_panics_total", "asset" => asset.as_str()).increment(count);
}

/// Record a transport connect attempt.
pub fn record_connect_attempt(asset: AssetClass) {
    counter!("market_stream_connect_attempts_total", "asset" => asset.as_str()).increment(1);
}

/// Record a successful reconnect.
pub fn record_reconnect(asset: AssetClass) {
    counter!("market_stream_reconnects_total", "asset" => asset.as_str()).increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(asset: AssetClass, state: ConnectionState) {
    gauge!("market_stream_connection_state", "asset" => asset.as_str()).set(state.as_gauge());
}

/// Record frame dispatch duration.
pub fn record_dispatch_duration(asset: AssetClass, duration: Duration) {
    histogram!("market_stream_dispatch_seconds", "asset" => asset.as_str())
        .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received(AssetClass::Stock);
        record_trades_dispatched(AssetClass::Crypto, 3);
        set_connection_state(AssetClass::Stock, ConnectionState::Streaming);
        record_dispatch_duration(AssetClass::Crypto, Duration::from_micros(5));
    }

    #[test]
    fn handle_absent_before_init() {
        // Other tests never install a recorder.
        assert!(get_metrics_handle().is_none());
    }
}
