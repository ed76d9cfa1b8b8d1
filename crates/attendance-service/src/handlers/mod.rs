//! HTTP request handlers for the Attendance Service.

pub mod health;
pub mod lectures;
pub mod ws;

pub use health::{liveness, readiness};
pub use lectures::{active_lectures, start_lecture, stop_lecture};
pub use ws::ws_upgrade;
