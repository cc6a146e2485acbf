//! Metrics collection and export for Knox.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use knox_core::DeliveryTotals;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "knox_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "knox_connections_active";
    pub const EVENTS_INBOUND: &str = "knox_events_inbound_total";
    pub const OUTBOUND_BYTES: &str = "knox_outbound_bytes_total";
    pub const DELIVERIES_TOTAL: &str = "knox_deliveries_total";
    pub const DELIVERIES_DROPPED: &str = "knox_deliveries_dropped_total";
    pub const ROOMS_ACTIVE: &str = "knox_rooms_active";
    pub const LATENCY_SECONDS: &str = "knox_event_latency_seconds";
    pub const ERRORS_TOTAL: &str = "knox_errors_total";
}

/// Describe every metric to the installed recorder.
///
/// Descriptions sent before a recorder is installed are discarded.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::EVENTS_INBOUND, "Client events received, by event name");
    metrics::describe_counter!(names::OUTBOUND_BYTES, "Bytes written to client sockets");
    metrics::describe_counter!(names::DELIVERIES_TOTAL, "Events queued for delivery");
    metrics::describe_counter!(
        names::DELIVERIES_DROPPED,
        "Deliveries dropped because an outbox was full or closed"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of live rooms");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Client event handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors, by type");

    info!("Metrics initialized");
}

/// Install the Prometheus recorder and its HTTP listener, then describe
/// all metrics.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    init_metrics();

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

/// Record an inbound client event.
pub fn record_inbound(event: &'static str) {
    counter!(names::EVENTS_INBOUND, "event" => event).increment(1);
}

/// Record bytes written to a client.
pub fn record_outbound(bytes: usize) {
    counter!(names::OUTBOUND_BYTES).increment(bytes as u64);
}

/// Publish the broadcast engine's running delivery counters.
pub fn record_delivery_totals(totals: DeliveryTotals) {
    counter!(names::DELIVERIES_TOTAL).absolute(totals.delivered);
    counter!(names::DELIVERIES_DROPPED).absolute(totals.dropped);
}

/// Record event handling latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update live room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
