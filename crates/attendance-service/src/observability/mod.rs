//! Observability for the Attendance Service.
//!
//! Health state for the probes and Prometheus metrics.
//!
//! Metric labels are bounded:
//! - `kind`: presence (recorded), dropped (recorder failed or timed out),
//!   invalid (undecodable payload), end (sentinel)
//! - `status`: success, error, timeout
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `attendance_sessions_active` | Gauge | none | Running lecture consumers |
//! | `attendance_ws_connections_active` | Gauge | none | Open WebSocket viewers |
//! | `attendance_consumer_reconnects_total` | Counter | none | Broker redial attempts |
//! | `attendance_broker_messages_total` | Counter | `kind` | Deliveries processed |
//! | `attendance_records_total` | Counter | `status` | Recorder outcomes |
//! | `attendance_record_duration_seconds` | Histogram | none | Recorder latency |
//! | `attendance_hub_messages_dropped_total` | Counter | none | Events dropped on full client queues |

pub mod health;
pub mod metrics;

pub use health::HealthState;
pub use metrics::{
    init_metrics_recorder, record_attendance, record_broker_message, record_consumer_reconnect,
    record_hub_drops, set_sessions_active, set_ws_connections_active,
};
