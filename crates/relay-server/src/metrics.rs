//! Metrics collection and export for Relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_protocol::ErrorCode;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tenvis_relay_core::{BroadcastReport, ChannelId, ChannelRegistry, RelayObserver};
use tenvis_relay_transport::ConnectionId;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const CHANNELS_CREATED_TOTAL: &str = "relay_channels_created_total";
    pub const CHANNELS_ACTIVE: &str = "relay_channels_active";
    pub const JOINS_TOTAL: &str = "relay_joins_total";
    pub const MESSAGES_TOTAL: &str = "relay_messages_total";
    pub const MESSAGES_BYTES: &str = "relay_messages_bytes";
    pub const SEND_FAILURES_TOTAL: &str = "relay_send_failures_total";
    pub const REJECTIONS_TOTAL: &str = "relay_rejections_total";
    pub const BROADCAST_SECONDS: &str = "relay_broadcast_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::CHANNELS_CREATED_TOTAL, "Total number of channels created");
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of live channels");
    metrics::describe_counter!(names::JOINS_TOTAL, "Total number of successful joins");
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of chat messages relayed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of chat messages relayed");
    metrics::describe_counter!(
        names::SEND_FAILURES_TOTAL,
        "Recipients evicted after a failed send"
    );
    metrics::describe_counter!(names::REJECTIONS_TOTAL, "Sessions refused, by reason");
    metrics::describe_histogram!(
        names::BROADCAST_SECONDS,
        "Time to fan a message out to a channel, in seconds"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Update active channel count.
pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}

/// Reports relay events as Prometheus metrics.
pub struct MetricsObserver {
    registry: Arc<ChannelRegistry>,
}

impl MetricsObserver {
    /// Create an observer that reads channel counts from `registry`.
    #[must_use]
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self { registry }
    }

    fn refresh_channels(&self) {
        set_active_channels(self.registry.stats().channel_count);
    }
}

impl RelayObserver for MetricsObserver {
    fn channel_created(&self, _channel: ChannelId) {
        counter!(names::CHANNELS_CREATED_TOTAL).increment(1);
        self.refresh_channels();
    }

    fn member_joined(&self, _channel: ChannelId) {
        counter!(names::JOINS_TOTAL).increment(1);
    }

    fn member_left(&self, _channel: ChannelId) {
        self.refresh_channels();
    }

    fn session_rejected(&self, code: ErrorCode) {
        counter!(names::REJECTIONS_TOTAL, "reason" => code.as_str()).increment(1);
    }

    fn message_relayed(&self, bytes: usize, _report: &BroadcastReport, elapsed: Duration) {
        counter!(names::MESSAGES_TOTAL).increment(1);
        counter!(names::MESSAGES_BYTES).increment(bytes as u64);
        histogram!(names::BROADCAST_SECONDS).record(elapsed.as_secs_f64());
    }

    fn send_failed(&self, _recipient: &ConnectionId) {
        counter!(names::SEND_FAILURES_TOTAL).increment(1);
        self.refresh_channels();
    }
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
