//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use huddle_core::BrokerStats;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const REQUESTS_TOTAL: &str = "huddle_requests_total";
    pub const REJECTIONS_TOTAL: &str = "huddle_rejections_total";
    pub const FRAMES_TOTAL: &str = "huddle_frames_total";
    pub const FRAMES_BYTES: &str = "huddle_frames_bytes";
    pub const PARTICIPANTS: &str = "huddle_participants";
    pub const ROOMS: &str = "huddle_rooms";
    pub const MESSAGES: &str = "huddle_messages";
    pub const LATENCY_SECONDS: &str = "huddle_request_latency_seconds";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_counter!(names::REQUESTS_TOTAL, "Client requests by kind");
    metrics::describe_counter!(names::REJECTIONS_TOTAL, "Rejected requests by reason");
    metrics::describe_counter!(names::FRAMES_TOTAL, "Frames sent and received");
    metrics::describe_counter!(names::FRAMES_BYTES, "Bytes of frames sent and received");
    metrics::describe_gauge!(names::PARTICIPANTS, "Current number of joined participants");
    metrics::describe_gauge!(names::ROOMS, "Current number of rooms");
    metrics::describe_gauge!(names::MESSAGES, "Messages appended to the log");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Request processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

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

/// Record a client request.
pub fn record_request(kind: &'static str) {
    counter!(names::REQUESTS_TOTAL, "kind" => kind).increment(1);
}

/// Record a rejected request.
pub fn record_rejection(reason: &'static str) {
    counter!(names::REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Record a frame on the wire.
pub fn record_frame(label: &'static str, bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "frame" => label, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record request latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update the broker gauges.
pub fn set_broker_stats(stats: &BrokerStats) {
    gauge!(names::PARTICIPANTS).set(stats.participant_count as f64);
    gauge!(names::ROOMS).set(stats.room_count as f64);
    gauge!(names::MESSAGES).set(stats.total_messages as f64);
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

#[cfg(test)]
mod tests {
    use super::names;

    #[test]
    fn test_only_counters_use_total_suffix() {
        let gauges = [
            names::CONNECTIONS_ACTIVE,
            names::PARTICIPANTS,
            names::ROOMS,
            names::MESSAGES,
        ];
        assert!(gauges.iter().all(|name| !name.ends_with("_total")));

        let counters = [
            names::CONNECTIONS_TOTAL,
            names::REQUESTS_TOTAL,
            names::REJECTIONS_TOTAL,
            names::FRAMES_TOTAL,
            names::ERRORS_TOTAL,
        ];
        assert!(counters.iter().all(|name| name.ends_with("_total")));
    }
}
