//! Lecture visits repository.
//!
//! Persists presence rows into `visits.lectures_visiting` and resolves the
//! visitor's identity and group in the same transaction.

use crate::errors::AttendanceError;
use crate::models::LectureId;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

/// Identity and group of a person who was just recorded as present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorRecord {
    pub isu: String,
    pub first_name: String,
    pub last_name: String,
    pub patronymic: Option<String>,
    pub group_code: Option<String>,
}

/// Repository for lecture attendance rows.
pub struct LectureVisitsRepository;

impl LectureVisitsRepository {
    /// Insert a visit for `(lecture_id, person_id, visited_at)` and return the
    /// visitor's identity.
    ///
    /// Both steps run in one transaction; on any failure nothing is written.
    ///
    /// # Errors
    ///
    /// - `AttendanceError::NotFound` if the person does not exist
    /// - `AttendanceError::Database` for any other database failure
    #[instrument(skip_all, fields(lecture_id = lecture_id))]
    pub async fn record_visit(
        pool: &PgPool,
        lecture_id: LectureId,
        person_id: &str,
        visited_at: DateTime<Utc>,
    ) -> Result<VisitorRecord, AttendanceError> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO visits.lectures_visiting (lecture_id, user_id, date)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(lecture_id)
        .bind(person_id)
        .bind(visited_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                AttendanceError::NotFound("Unknown person".to_string())
            }
            _ => AttendanceError::from(e),
        })?;

        // A student may belong to several groups; the first by code is reported.
        let row: Option<VisitorRow> = sqlx::query_as(
            r#"
            SELECT
                u.isu,
                u.first_name,
                u.last_name,
                u.patronymic,
                sg.group_code
            FROM cores.users u
            LEFT JOIN universities_data.students_groups sg ON sg.user_id = u.isu
            WHERE u.isu = $1
            ORDER BY sg.group_code
            LIMIT 1
            "#,
        )
        .bind(person_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(AttendanceError::NotFound("Unknown person".to_string()));
        };

        tx.commit().await?;

        Ok(VisitorRecord {
            isu: row.isu,
            first_name: row.first_name,
            last_name: row.last_name,
            patronymic: row.patronymic,
            group_code: row.group_code,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VisitorRow {
    isu: String,
    first_name: String,
    last_name: String,
    patronymic: Option<String>,
    group_code: Option<String>,
}
