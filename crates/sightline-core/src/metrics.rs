//! Prometheus metrics helpers for the sightline bridge.
//!
//! Centralized metrics initialization and the metric definitions shared
//! across sightline components.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sightline_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     use metrics::counter;
//!     counter!("stream_events_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`stream_`, `pipeline_`, `sighting_`, `sync_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: used sparingly to avoid cardinality explosion

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once at startup before any metrics are recorded.
/// Returns a handle for [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already
/// installed instead of panicking. Useful for tests.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves `/metrics` on the given port. Spawns a background task and
/// returns immediately.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics used across sightline.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    // =========================================================================
    // Stream Connection Metrics
    // =========================================================================

    describe_counter!(
        "stream_events_total",
        "Total messages received from the EDR event stream"
    );
    describe_counter!(
        "stream_parse_errors_total",
        "Messages dropped because they failed to parse as JSON"
    );
    describe_counter!(
        "stream_reconnects_total",
        "Times the stream connection was re-established after a fault"
    );
    describe_gauge!(
        "stream_connected",
        "Whether the event stream is currently connected (1=yes, 0=no)"
    );

    // =========================================================================
    // Ingestion Pipeline Metrics
    // =========================================================================

    describe_gauge!("pipeline_queue_depth", "Events waiting in the work queue");
    describe_counter!(
        "pipeline_events_handled_total",
        "Events drained from the queue and passed to the handler"
    );
    describe_counter!(
        "pipeline_handler_errors_total",
        "Handler faults (logged and skipped, pipeline continues)"
    );

    // =========================================================================
    // Sighting Metrics
    // =========================================================================

    describe_counter!(
        "sighting_values_extracted_total",
        "Indicator values extracted from events before dedup filtering"
    );
    describe_counter!(
        "sighting_values_filtered_total",
        "Indicator values suppressed by the cooldown cache"
    );
    describe_counter!(
        "sighting_reports_total",
        "Sighting batches successfully reported to the intel platform"
    );
    describe_counter!(
        "sighting_report_failures_total",
        "Sighting POSTs that failed (cache left untouched for retry)"
    );
    describe_gauge!(
        "sighting_cache_entries",
        "Entries currently held in the dedup cache across all sources"
    );

    // =========================================================================
    // Reconciliation Metrics
    // =========================================================================

    describe_counter!("sync_cycles_total", "Reconciliation cycles completed");
    describe_counter!(
        "sync_iocs_added_total",
        "Indicators pushed to the EDR store by reconciliation"
    );
    describe_counter!(
        "sync_iocs_deleted_total",
        "Indicators removed from the EDR store by reconciliation"
    );
    describe_counter!(
        "sync_apply_failures_total",
        "Individual add/delete operations that failed (batch continued)"
    );
}
