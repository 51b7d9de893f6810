//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

/// Metric names as constants for consistency.
pub mod names {
    // Task lifecycle
    pub const TASKS_FETCHED_TOTAL: &str = "fswap_tasks_fetched_total";
    pub const TASKS_COMPLETED_TOTAL: &str = "fswap_tasks_completed_total";
    pub const TASKS_FAILED_TOTAL: &str = "fswap_tasks_failed_total";
    pub const TASK_DURATION_SECONDS: &str = "fswap_task_duration_seconds";
    pub const FETCH_FAILURES_TOTAL: &str = "fswap_fetch_failures_total";

    // Stages
    pub const STAGE_DURATION_SECONDS: &str = "fswap_stage_duration_seconds";
    pub const STAGE_FAILURES_TOTAL: &str = "fswap_stage_failures_total";

    // Progress channel
    pub const PROGRESS_SENT_TOTAL: &str = "fswap_progress_sent_total";
    pub const PROGRESS_THROTTLED_TOTAL: &str = "fswap_progress_throttled_total";
    pub const PROGRESS_FAILED_TOTAL: &str = "fswap_progress_failed_total";
}

/// Install the Prometheus recorder with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => info!("Serving metrics on {}", addr),
        Err(e) => warn!("Failed to start metrics exporter on {}: {}", addr, e),
    }
}

pub fn record_task_fetched() {
    counter!(names::TASKS_FETCHED_TOTAL).increment(1);
}

pub fn record_task_completed(kind: &str, duration_secs: f64) {
    let labels = [("kind", kind.to_string())];
    counter!(names::TASKS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::TASK_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_task_failed(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::TASKS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_fetch_failure() {
    counter!(names::FETCH_FAILURES_TOTAL).increment(1);
}

pub fn record_stage(stage: &str, duration_secs: f64, success: bool) {
    let labels = [("stage", stage.to_string())];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
    if !success {
        counter!(names::STAGE_FAILURES_TOTAL, &labels).increment(1);
    }
}

pub fn record_progress_sent() {
    counter!(names::PROGRESS_SENT_TOTAL).increment(1);
}

pub fn record_progress_throttled() {
    counter!(names::PROGRESS_THROTTLED_TOTAL).increment(1);
}

pub fn record_progress_failed() {
    counter!(names::PROGRESS_FAILED_TOTAL).increment(1);
}
