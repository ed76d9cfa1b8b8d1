//! Scripted attendance recorder.
//!
//! Knows a fixed set of people; anyone else is `NotFound`. Can be made to
//! fail every call or to take a fixed time per call.

use attendance_service::errors::AttendanceError;
use attendance_service::models::{AttendanceEvent, LectureId, UserIdentity};
use attendance_service::recorder::AttendanceRecorder;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Mock recorder for hub and consumer tests.
#[derive(Debug, Default)]
pub struct MockRecorder {
    people: HashMap<String, (UserIdentity, Option<String>)>,
    failing: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<(LectureId, String)>>,
}

impl MockRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a person the recorder can resolve.
    #[must_use]
    pub fn with_person(
        mut self,
        isu: &str,
        name: &str,
        last_name: &str,
        group: Option<&str>,
    ) -> Self {
        self.people.insert(
            isu.to_string(),
            (
                UserIdentity {
                    isu: isu.to_string(),
                    name: name.to_string(),
                    last_name: last_name.to_string(),
                    patronymic: None,
                },
                group.map(str::to_string),
            ),
        );
        self
    }

    /// Every call fails with a database error.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Every call sleeps for `delay` (tokio time) before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(lecture_id, person_id)` of every call, in call order.
    pub fn calls(&self) -> Vec<(LectureId, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl AttendanceRecorder for MockRecorder {
    async fn record(
        &self,
        lecture_id: LectureId,
        person_id: &str,
    ) -> Result<AttendanceEvent, AttendanceError> {
        self.calls
            .lock()
            .unwrap()
            .push((lecture_id, person_id.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing {
            return Err(AttendanceError::Database("mock recorder failure".to_string()));
        }

        let (user, group) = self
            .people
            .get(person_id)
            .cloned()
            .ok_or_else(|| AttendanceError::NotFound("Unknown person".to_string()))?;

        Ok(AttendanceEvent {
            user,
            lecture_id,
            group,
        })
    }
}
