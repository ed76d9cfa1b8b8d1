//! Repository layer for the Attendance Service.
//!
//! All queries use parameterized statements.

pub mod lecture_visits;

pub use lecture_visits::{LectureVisitsRepository, VisitorRecord};
