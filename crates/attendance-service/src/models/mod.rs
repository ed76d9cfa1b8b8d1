//! Attendance Service models.
//!
//! Wire formats for the broker queue, the WebSocket control channel and the
//! HTTP control endpoints, plus the enriched attendance event.

use serde::{Deserialize, Deserializer, Serialize};

/// Lecture identifier as stored in the catalog.
pub type LectureId = i64;

// ============================================================================
// Broker wire format
// ============================================================================

/// Presence snapshot published by the recognition pipeline.
///
/// Only `person_id` is required; the queue is already per-lecture, so an
/// embedded `lecture_id` is informational.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresenceSnapshot {
    /// Student ISU number of the detected person.
    pub person_id: String,

    #[serde(default)]
    pub lecture_id: Option<LectureId>,
}

/// Minimal envelope used to detect the end-of-lecture sentinel.
#[derive(Debug, Default, Deserialize)]
struct LectureEndEnvelope {
    #[serde(default)]
    end: bool,
}

/// Returns true when `payload` is the `{"end": true}` sentinel.
///
/// Anything that does not decode is treated as a regular message.
pub fn is_lecture_end(payload: &[u8]) -> bool {
    serde_json::from_slice::<LectureEndEnvelope>(payload)
        .map(|envelope| envelope.end)
        .unwrap_or(false)
}

// ============================================================================
// Enriched attendance event (server -> WebSocket client)
// ============================================================================

/// Identity block of an attendance event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub isu: String,
    pub name: String,
    pub last_name: String,
    pub patronymic: Option<String>,
}

/// Attendance record enriched with identity and group, as sent to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub user: UserIdentity,
    pub lecture_id: LectureId,
    pub group: Option<String>,
}

// ============================================================================
// WebSocket control frames (client -> server)
// ============================================================================

/// Subscription action requested by a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
}

/// Control frame sent by a viewer over the WebSocket.
///
/// `lecture_id` is accepted either as a JSON number or as a numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlFrame {
    pub action: ControlAction,

    #[serde(deserialize_with = "lecture_id_from_number_or_string")]
    pub lecture_id: LectureId,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(i64),
    Text(String),
}

fn lecture_id_from_number_or_string<'de, D>(deserializer: D) -> Result<LectureId, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(id) => Ok(id),
        NumberOrString::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

// ============================================================================
// HTTP control API
// ============================================================================

/// Body of `POST /api/lecture/start`.
#[derive(Debug, Clone, Deserialize)]
pub struct StartLectureRequest {
    pub lecture_id: LectureId,
    pub queue: String,
}

/// Body of `POST /api/lecture/stop`.
#[derive(Debug, Clone, Deserialize)]
pub struct StopLectureRequest {
    pub lecture_id: LectureId,
}

/// Status reply of the control endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LectureStatusResponse {
    /// "started", "already_running" or "ok".
    pub status: String,
}

/// One entry of `GET /api/lecture/active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveLecture {
    pub lecture_id: LectureId,
    pub queue: String,
}

/// Liveness/readiness reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "draining".
    pub status: String,
    pub active_lectures: usize,
    pub watched_lectures: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_is_lecture_end_detects_sentinel() {
        assert!(is_lecture_end(br#"{"end": true}"#));
        assert!(is_lecture_end(br#"{"end": true, "person_id": "1"}"#));
    }

    #[test]
    fn test_is_lecture_end_ignores_regular_and_malformed_payloads() {
        assert!(!is_lecture_end(br#"{"person_id": "12345"}"#));
        assert!(!is_lecture_end(br#"{"end": false}"#));
        assert!(!is_lecture_end(b"not json at all"));
        assert!(!is_lecture_end(br#"{"end": "yes"}"#));
        assert!(!is_lecture_end(b""));
    }

    #[test]
    fn test_presence_snapshot_minimal() {
        let snapshot: PresenceSnapshot = serde_json::from_str(r#"{"person_id":"12345"}"#).unwrap();
        assert_eq!(snapshot.person_id, "12345");
        assert_eq!(snapshot.lecture_id, None);
    }

    #[test]
    fn test_presence_snapshot_ignores_unknown_fields() {
        let snapshot: PresenceSnapshot = serde_json::from_str(
            r#"{"person_id":"12345","lecture_id":7,"confidence":0.93,"camera":"a-101"}"#,
        )
        .unwrap();
        assert_eq!(snapshot.lecture_id, Some(7));
    }

    #[test]
    fn test_control_frame_numeric_lecture_id() {
        let frame: ControlFrame =
            serde_json::from_str(r#"{"action":"subscribe","lecture_id":7}"#).unwrap();
        assert_eq!(frame.action, ControlAction::Subscribe);
        assert_eq!(frame.lecture_id, 7);
    }

    #[test]
    fn test_control_frame_string_lecture_id() {
        let frame: ControlFrame =
            serde_json::from_str(r#"{"action":"unsubscribe","lecture_id":"42"}"#).unwrap();
        assert_eq!(frame.action, ControlAction::Unsubscribe);
        assert_eq!(frame.lecture_id, 42);
    }

    #[test]
    fn test_control_frame_rejects_garbage() {
        assert!(
            serde_json::from_str::<ControlFrame>(r#"{"action":"subscribe","lecture_id":"abc"}"#)
                .is_err()
        );
        assert!(
            serde_json::from_str::<ControlFrame>(r#"{"action":"join","lecture_id":1}"#).is_err()
        );
        assert!(serde_json::from_str::<ControlFrame>(r#"{"action":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_attendance_event_wire_shape() {
        let event = AttendanceEvent {
            user: UserIdentity {
                isu: "12345".to_string(),
                name: "A".to_string(),
                last_name: "B".to_string(),
                patronymic: None,
            },
            lecture_id: 7,
            group: Some("P3212".to_string()),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "user": {"isu": "12345", "name": "A", "last_name": "B", "patronymic": null},
                "lecture_id": 7,
                "group": "P3212"
            })
        );
    }
}
