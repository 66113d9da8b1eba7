//! Metrics module
//!
//! Prometheus metrics for URL issuance and client-side transfers.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

lazy_static! {
    // Issuance metrics
    pub static ref PRESIGN_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "tsubame_presign_requests_total",
        "Pre-signed URL requests by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref PRESIGN_DURATION: Histogram = register_histogram!(
        "tsubame_presign_duration_seconds",
        "Time spent validating and signing an upload URL",
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    ).unwrap();

    // Transfer metrics
    pub static ref TRANSFERS_TOTAL: CounterVec = register_counter_vec!(
        "tsubame_transfers_total",
        "Settled transfer attempts by final status",
        &["status"]
    ).unwrap();

    pub static ref TRANSFER_BYTES_TOTAL: Counter = register_counter!(
        "tsubame_transfer_bytes_total",
        "Bytes of completed uploads"
    ).unwrap();
}

/// Record the outcome of an issuance request
///
/// `outcome` is `issued` or the error label (`missing_parameter`,
/// `size_exceeded`, `invalid_type`, `issuance_failed`).
pub fn record_presign(outcome: &str, duration_secs: f64) {
    PRESIGN_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    PRESIGN_DURATION.observe(duration_secs);
}

/// Record a completed transfer
pub fn record_transfer_completed(bytes: u64) {
    TRANSFERS_TOTAL.with_label_values(&["completed"]).inc();
    TRANSFER_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a transfer attempt that did not complete
///
/// `status` is `error`, `paused` or `canceled`.
pub fn record_transfer_stopped(status: &str) {
    TRANSFERS_TOTAL.with_label_values(&[status]).inc();
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
