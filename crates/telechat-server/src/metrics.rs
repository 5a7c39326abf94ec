//! Metrics collection and export for telechat.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;
use telechat_core::{DistributionError, MessageKind, RoundReport};
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "telechat_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "telechat_connections_active";
    pub const CONNECTIONS_REFUSED: &str = "telechat_connections_refused_total";
    pub const MESSAGES_TOTAL: &str = "telechat_messages_total";
    pub const ROUNDS_TOTAL: &str = "telechat_rounds_total";
    pub const ROUND_SECONDS: &str = "telechat_round_seconds";
    pub const PUBLISH_FAILURES: &str = "telechat_publish_failures_total";
    pub const ERRORS_TOTAL: &str = "telechat_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of telnet connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of telnet connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REFUSED,
        "Connections refused because the client limit was reached"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Delivered messages by kind");
    metrics::describe_counter!(names::ROUNDS_TOTAL, "Completed delivery rounds");
    metrics::describe_histogram!(
        names::ROUND_SECONDS,
        "Time from publish to the end of its round in seconds"
    );
    metrics::describe_counter!(
        names::PUBLISH_FAILURES,
        "Publishes that found nobody to deliver to"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

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

/// Record a refused connection.
pub fn record_refused() {
    counter!(names::CONNECTIONS_REFUSED).increment(1);
}

/// Record a completed round and the message it delivered.
pub fn record_round(kind: MessageKind, seconds: f64) {
    counter!(names::ROUNDS_TOTAL).increment(1);
    counter!(names::MESSAGES_TOTAL, "kind" => kind.as_str()).increment(1);
    histogram!(names::ROUND_SECONDS).record(seconds);
}

/// Record a publish that found no listeners.
pub fn record_publish_failure(kind: MessageKind) {
    counter!(names::PUBLISH_FAILURES, "kind" => kind.as_str()).increment(1);
}

/// Record the outcome of a publish started at `started`.
pub fn record_publish(
    kind: MessageKind,
    started: Instant,
    result: &Result<RoundReport, DistributionError>,
) {
    match result {
        Ok(_) => record_round(kind, started.elapsed().as_secs_f64()),
        Err(_) => record_publish_failure(kind),
    }
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
