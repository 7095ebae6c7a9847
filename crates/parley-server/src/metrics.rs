//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Hub counters live in the hub actor and are copied
//! into gauges by [`spawn_hub_sampler`].

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::{HubHandle, HubStats};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "parley_connections_rejected_total";
    pub const SESSIONS_REGISTERED: &str = "parley_sessions_registered";
    pub const EVICTIONS_TOTAL: &str = "parley_evictions_total";
    pub const MESSAGES_DISPATCHED: &str = "parley_messages_dispatched_total";
    pub const MESSAGES_UNDELIVERABLE: &str = "parley_messages_undeliverable_total";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Upgrades rejected before a session was created"
    );
    metrics::describe_gauge!(
        names::SESSIONS_REGISTERED,
        "Users currently registered with the hub"
    );
    metrics::describe_gauge!(
        names::EVICTIONS_TOTAL,
        "Sessions evicted for a full or closed outbound queue"
    );
    metrics::describe_gauge!(
        names::MESSAGES_DISPATCHED,
        "Chat messages queued to a connected recipient"
    );
    metrics::describe_gauge!(
        names::MESSAGES_UNDELIVERABLE,
        "Chat messages whose recipient was offline"
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

/// Record a rejected upgrade.
pub fn record_rejection(reason: &'static str) {
    counter!(names::CONNECTIONS_REJECTED, "reason" => reason).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Publish a hub snapshot.
///
/// Hub totals are monotonic, but they are owned by the hub, so they are
/// exported as gauges set from each snapshot.
pub fn record_hub_stats(stats: &HubStats) {
    gauge!(names::SESSIONS_REGISTERED).set(stats.connected as f64);
    gauge!(names::EVICTIONS_TOTAL).set(stats.evictions as f64);
    gauge!(names::MESSAGES_DISPATCHED).set(stats.dispatched as f64);
    gauge!(names::MESSAGES_UNDELIVERABLE).set(stats.undeliverable as f64);
}

/// Sample hub statistics every `period` until the hub stops.
pub fn spawn_hub_sampler(hub: HubHandle, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match hub.stats().await {
                Ok(stats) => record_hub_stats(&stats),
                Err(e) => {
                    debug!(error = %e, "Hub sampler stopped");
                    break;
                }
            }
        }
    })
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
