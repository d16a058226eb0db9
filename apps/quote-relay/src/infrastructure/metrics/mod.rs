//! Prometheus Metrics Module
//!
//! Exposes relay metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ticks**: Received from upstream, forwarded to clients, dropped
//! - **Protocol errors**: Malformed upstream and client frames
//! - **Delivery**: Client send failures, upstream command failures
//! - **Link**: Reconnect attempts and open/closed state
//! - **Population**: Connected clients and globally wanted symbols
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before `init_metrics` is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::protocol::UpstreamAction;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
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
    // Tick counters
    describe_counter!(
        "quote_relay_ticks_received_total",
        "Total ticks received from upstream"
    );
    describe_counter!(
        "quote_relay_ticks_forwarded_total",
        "Total tick deliveries queued to clients"
    );
    describe_counter!(
        "quote_relay_ticks_dropped_total",
        "Total ticks routed to nobody, by reason"
    );

    // Error counters
    describe_counter!(
        "quote_relay_malformed_upstream_frames_total",
        "Upstream frames that were not valid JSON ticks"
    );
    describe_counter!(
        "quote_relay_malformed_client_frames_total",
        "Client frames that were not valid requests"
    );
    describe_counter!(
        "quote_relay_client_send_failures_total",
        "Clients removed after a failed send"
    );
    describe_counter!(
        "quote_relay_upstream_command_failures_total",
        "Upstream subscribe/unsubscribe commands that could not be sent"
    );
    describe_counter!(
        "quote_relay_reconnects_total",
        "Total upstream reconnection attempts scheduled"
    );

    // Gauges
    describe_gauge!(
        "quote_relay_connected_clients",
        "Number of connected downstream clients"
    );
    describe_gauge!(
        "quote_relay_subscribed_symbols",
        "Number of symbols in the global subscription set"
    );
    describe_gauge!(
        "quote_relay_upstream_open",
        "1 while the upstream link is open, 0 otherwise"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a tick reached nobody.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The tick carried no routing symbol.
    NoSymbol,
    /// No client is subscribed to the tick's symbol.
    NoSubscribers,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::NoSymbol => "no_symbol",
            Self::NoSubscribers => "no_subscribers",
        }
    }
}

/// Record a tick received from upstream.
pub fn record_tick_received() {
    counter!("quote_relay_ticks_received_total").increment(1);
}

/// Record tick deliveries to clients.
pub fn record_ticks_forwarded(count: u64) {
    counter!("quote_relay_ticks_forwarded_total").increment(count);
}

/// Record a tick that reached nobody.
pub fn record_tick_dropped(reason: DropReason) {
    counter!(
        "quote_relay_ticks_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a discarded upstream frame.
pub fn record_malformed_upstream_frame() {
    counter!("quote_relay_malformed_upstream_frames_total").increment(1);
}

/// Record a rejected client frame.
pub fn record_malformed_client_frame() {
    counter!("quote_relay_malformed_client_frames_total").increment(1);
}

/// Record a client removed after a failed send.
pub fn record_client_send_failure() {
    counter!("quote_relay_client_send_failures_total").increment(1);
}

/// Record an upstream command that could not be sent.
pub fn record_upstream_command_failure(action: UpstreamAction) {
    counter!(
        "quote_relay_upstream_command_failures_total",
        "action" => action.as_str()
    )
    .increment(1);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("quote_relay_reconnects_total").increment(1);
}

/// Update the connected client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_connected_clients(count: usize) {
    gauge!("quote_relay_connected_clients").set(count as f64);
}

/// Update the global symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribed_symbols(count: usize) {
    gauge!("quote_relay_subscribed_symbols").set(count as f64);
}

/// Update the upstream link state gauge.
pub fn set_upstream_open(open: bool) {
    gauge!("quote_relay_upstream_open").set(if open { 1.0 } else { 0.0 });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::NoSymbol.as_str(), "no_symbol");
        assert_eq!(DropReason::NoSubscribers.as_str(), "no_subscribers");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick_received();
        record_ticks_forwarded(3);
        record_tick_dropped(DropReason::NoSubscribers);
        record_upstream_command_failure(UpstreamAction::Subscribe);
        set_connected_clients(2);
        set_upstream_open(true);
    }
}
