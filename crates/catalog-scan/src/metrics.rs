//! Prometheus metrics for the scan engine
//!
//! Exposed metrics:
//! - `viewsync_scans_total` - Counter of scans by outcome (ok or error code)
//! - `viewsync_scan_duration_seconds` - Histogram of whole-scan latency
//! - `viewsync_views_total` - Counter of view reconciliations by action
//! - `viewsync_view_operation_duration_seconds` - Histogram of create/update latency

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};
use std::time::Duration;

lazy_static! {
    /// Counter for scans by outcome
    pub static ref SCANS_TOTAL: CounterVec = register_counter_vec!(
        "viewsync_scans_total",
        "Total number of datasource scans",
        &["outcome"]
    )
    .unwrap();

    /// Histogram for scan duration in seconds
    pub static ref SCAN_DURATION_SECONDS: Histogram = register_histogram!(
        "viewsync_scan_duration_seconds",
        "Datasource scan latency in seconds",
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 3600.0]
    )
    .unwrap();

    /// Counter for view reconciliations (created, updated, errored, deleted)
    pub static ref VIEWS_TOTAL: CounterVec = register_counter_vec!(
        "viewsync_views_total",
        "Total number of logical views reconciled by action",
        &["action"]
    )
    .unwrap();

    /// Histogram for per-view create/update latency in seconds
    pub static ref VIEW_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "viewsync_view_operation_duration_seconds",
        "Per-view reconciliation latency in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap();
}

/// Record a finished scan; `outcome` is `ok` or an error code
pub fn record_scan(outcome: &str, duration: Duration) {
    SCANS_TOTAL.with_label_values(&[outcome]).inc();
    SCAN_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_views(action: &str, count: usize) {
    if count > 0 {
        VIEWS_TOTAL.with_label_values(&[action]).inc_by(count as f64);
    }
}

pub fn observe_view_operation(operation: &str, duration: Duration) {
    VIEW_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

/// Render every registered metric in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
