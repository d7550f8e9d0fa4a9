//! Prometheus metrics for pipeline runs.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use trapdata_models::Stage;

/// Metric names as constants for consistency.
pub mod names {
    pub const BATCHES_COMMITTED_TOTAL: &str = "trapdata_batches_committed_total";
    pub const ITEMS_DONE_TOTAL: &str = "trapdata_items_done_total";
    pub const ITEMS_FAILED_TOTAL: &str = "trapdata_items_failed_total";
    pub const BATCH_DURATION_SECONDS: &str = "trapdata_batch_duration_seconds";
    pub const RUNS_TOTAL: &str = "trapdata_runs_total";
}

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Record one committed batch.
pub fn record_batch(stage: Stage, done: usize, failed: usize, duration_secs: f64) {
    let labels = [("stage", stage.as_str().to_string())];
    counter!(names::BATCHES_COMMITTED_TOTAL, &labels).increment(1);
    counter!(names::ITEMS_DONE_TOTAL, &labels).increment(done as u64);
    counter!(names::ITEMS_FAILED_TOTAL, &labels).increment(failed as u64);
    histogram!(names::BATCH_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record the end of a run.
pub fn record_run(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::RUNS_TOTAL, &labels).increment(1);
}
