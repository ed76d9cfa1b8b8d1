//! Broker payloads and WebSocket control frames.

use attendance_service::models::LectureId;
use serde_json::json;

/// `{"person_id": ...}` as published by the recognition pipeline.
pub fn presence_payload(person_id: &str) -> Vec<u8> {
    json!({ "person_id": person_id }).to_string().into_bytes()
}

/// Presence payload carrying an explicit `lecture_id`.
pub fn presence_payload_for(person_id: &str, lecture_id: LectureId) -> Vec<u8> {
    json!({ "person_id": person_id, "lecture_id": lecture_id })
        .to_string()
        .into_bytes()
}

/// The `{"end": true}` sentinel.
pub fn end_of_lecture_payload() -> Vec<u8> {
    json!({ "end": true }).to_string().into_bytes()
}

pub fn subscribe_frame(lecture_id: LectureId) -> String {
    json!({ "action": "subscribe", "lecture_id": lecture_id }).to_string()
}

pub fn unsubscribe_frame(lecture_id: LectureId) -> String {
    json!({ "action": "unsubscribe", "lecture_id": lecture_id }).to_string()
}
