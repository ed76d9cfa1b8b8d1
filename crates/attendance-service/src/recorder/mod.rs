//! Attendance recorder.
//!
//! The hub hands every presence snapshot to an [`AttendanceRecorder`], which
//! persists it and returns the enriched [`AttendanceEvent`]. The trait is the
//! seam used to test fanout without a database.

use crate::errors::AttendanceError;
use crate::models::{AttendanceEvent, LectureId, UserIdentity};
use crate::repositories::{LectureVisitsRepository, VisitorRecord};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, instrument};

/// Persists a presence snapshot and resolves who was seen.
///
/// Failures are returned to the caller and never retried here: a failed
/// snapshot is dropped from the broadcast.
#[async_trait::async_trait]
pub trait AttendanceRecorder: Send + Sync {
    async fn record(
        &self,
        lecture_id: LectureId,
        person_id: &str,
    ) -> Result<AttendanceEvent, AttendanceError>;
}

/// Postgres-backed recorder.
#[derive(Clone)]
pub struct PgAttendanceRecorder {
    pool: PgPool,
}

impl PgAttendanceRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AttendanceRecorder for PgAttendanceRecorder {
    #[instrument(skip_all, name = "attendance.recorder.record", fields(lecture_id = lecture_id))]
    async fn record(
        &self,
        lecture_id: LectureId,
        person_id: &str,
    ) -> Result<AttendanceEvent, AttendanceError> {
        let visitor =
            LectureVisitsRepository::record_visit(&self.pool, lecture_id, person_id, Utc::now())
                .await?;

        debug!(
            target: "attendance.recorder",
            lecture_id = lecture_id,
            "Presence recorded"
        );

        Ok(attendance_event(lecture_id, visitor))
    }
}

/// Build the wire event from a stored visitor.
pub fn attendance_event(lecture_id: LectureId, visitor: VisitorRecord) -> AttendanceEvent {
    AttendanceEvent {
        user: UserIdentity {
            isu: visitor.isu,
            name: visitor.first_name,
            last_name: visitor.last_name,
            patronymic: visitor.patronymic,
        },
        lecture_id,
        group: visitor.group_code,
    }
}
