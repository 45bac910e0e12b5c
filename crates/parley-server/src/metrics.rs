//! Metrics export for Parley.
//!
//! The request path records through the `metrics` facade (see
//! `parley_core::metrics`); this module describes those metrics and
//! exports them in Prometheus format.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::metrics::names;
use std::net::SocketAddr;
use tracing::info;

/// Describe every metric the server records.
pub fn init_metrics() {
    metrics::describe_counter!(names::REQUESTS_TOTAL, "Requests handled, by command");
    metrics::describe_counter!(
        names::REQUEST_FAILURES_TOTAL,
        "Requests answered with status=false, by kind"
    );
    metrics::describe_histogram!(
        names::REQUEST_LATENCY_SECONDS,
        "Request processing latency in seconds"
    );
    metrics::describe_counter!(
        names::FANOUT_PUBLISHES_TOTAL,
        "Chat lines published to channel topics"
    );
    metrics::describe_counter!(
        names::FANOUT_FAILURES_TOTAL,
        "Chat line publishes that failed"
    );
    metrics::describe_gauge!(names::USERS_ACTIVE, "Currently logged-in users");
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Known channels");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics listener.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}
