//! Prometheus metrics for front-end observability
//!
//! Exposes metrics at /metrics endpoint for scraping by Prometheus. Until
//! [`init_metrics`] runs, recording is a no-op and the endpoint is empty.

use anyhow::Context;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;

/// Global Prometheus handle
static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Metric names
pub const CALLS_TOTAL: &str = "pipeline_calls_total";
pub const CALL_DURATION: &str = "pipeline_call_duration_seconds";
pub const REQUEST_BYTES: &str = "pipeline_request_bytes";
pub const WORKER_ALIVE: &str = "pipeline_worker_alive";
pub const WORKER_RESTARTS: &str = "pipeline_worker_restarts_total";
pub const CALLS_WAITING: &str = "pipeline_calls_waiting";

/// Initialize the metrics system
pub fn init_metrics() -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    METRICS_HANDLE
        .set(handle)
        .map_err(|_| anyhow::anyhow!("Metrics already initialized"))?;

    // Describe metrics for Prometheus
    describe_counter!(CALLS_TOTAL, "Annotation calls by engine and outcome");
    describe_histogram!(CALL_DURATION, "Time spent inside the worker per call in seconds");
    describe_histogram!(REQUEST_BYTES, "Document size per call in bytes");
    describe_gauge!(WORKER_ALIVE, "1 while the engine's worker process is running");
    describe_counter!(WORKER_RESTARTS, "Worker relaunches after an exit");
    describe_gauge!(CALLS_WAITING, "Calls queued for an engine's worker");

    tracing::info!("Metrics system initialized");
    Ok(())
}

/// Handler for /metrics endpoint
pub async fn metrics_handler() -> String {
    METRICS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

// ============================================================================
// Call Metrics
// ============================================================================

/// Record a finished call with its outcome label
pub fn record_call(engine: &str, outcome: &'static str, duration: Duration) {
    counter!(CALLS_TOTAL, "engine" => engine.to_string(), "outcome" => outcome).increment(1);
    histogram!(CALL_DURATION, "engine" => engine.to_string()).record(duration.as_secs_f64());
}

/// Record the size of a submitted document
#[allow(clippy::cast_precision_loss)]
pub fn record_request_bytes(engine: &str, bytes: usize) {
    histogram!(REQUEST_BYTES, "engine" => engine.to_string()).record(bytes as f64);
}

/// Set the number of calls waiting for an engine
#[allow(clippy::cast_precision_loss)]
pub fn set_calls_waiting(engine: &str, count: usize) {
    gauge!(CALLS_WAITING, "engine" => engine.to_string()).set(count as f64);
}

// ============================================================================
// Worker Metrics
// ============================================================================

/// Record whether an engine's worker is running
pub fn set_worker_alive(engine: &str, alive: bool) {
    gauge!(WORKER_ALIVE, "engine" => engine.to_string()).set(if alive { 1.0 } else { 0.0 });
}

/// Record a worker relaunch
pub fn record_restart(engine: &str) {
    counter!(WORKER_RESTARTS, "engine" => engine.to_string()).increment(1);
}
