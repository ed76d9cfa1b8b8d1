//! Metrics definitions for the Attendance Service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `attendance_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Recorder calls are single-row transactions; the tail is bounded by
        // the record timeout (5s by default).
        .set_buckets_for_metric(
            Matcher::Prefix("attendance_record".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set recorder buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Set the number of running lecture consumers.
///
/// Metric: `attendance_sessions_active`
pub fn set_sessions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("attendance_sessions_active").set(count as f64);
}

/// Set the number of open WebSocket connections.
///
/// Metric: `attendance_ws_connections_active`
pub fn set_ws_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("attendance_ws_connections_active").set(count as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Record a broker redial attempt after a failure.
///
/// Metric: `attendance_consumer_reconnects_total`
pub fn record_consumer_reconnect() {
    counter!("attendance_consumer_reconnects_total").increment(1);
}

/// Record a processed broker delivery.
///
/// Metric: `attendance_broker_messages_total`
/// Labels: `kind` (presence, dropped, invalid, end)
pub fn record_broker_message(kind: &'static str) {
    counter!("attendance_broker_messages_total", "kind" => kind).increment(1);
}

/// Record events dropped because a viewer's outbound queue was full or closed.
///
/// Metric: `attendance_hub_messages_dropped_total`
pub fn record_hub_drops(count: usize) {
    if count > 0 {
        counter!("attendance_hub_messages_dropped_total").increment(count as u64);
    }
}

// ============================================================================
// Recorder
// ============================================================================

/// Record the outcome and latency of one recorder call.
///
/// Metrics: `attendance_records_total`, `attendance_record_duration_seconds`
/// Labels: `status` (success, error, timeout)
pub fn record_attendance(status: &'static str, duration: Duration) {
    counter!("attendance_records_total", "status" => status).increment(1);
    histogram!("attendance_record_duration_seconds").record(duration.as_secs_f64());
}
