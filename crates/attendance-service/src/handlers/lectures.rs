//! Lecture control handlers.
//!
//! - `POST /api/lecture/start` - Start consuming a lecture queue
//! - `POST /api/lecture/stop` - Stop a lecture's consumer
//! - `GET /api/lecture/active` - List running lectures

use crate::errors::AttendanceError;
use crate::models::{ActiveLecture, LectureStatusResponse, StartLectureRequest, StopLectureRequest};
use crate::routes::AppState;
use crate::sessions::StartOutcome;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

fn status(value: &str) -> Json<LectureStatusResponse> {
    Json(LectureStatusResponse {
        status: value.to_string(),
    })
}

/// Handler for `POST /api/lecture/start`.
///
/// # Response
///
/// - 202 Accepted `{"status":"started"}`: consumer spawned
/// - 200 OK `{"status":"already_running"}`: nothing changed
/// - 400 Bad Request: malformed body or empty queue name
/// - 503 Service Unavailable: shutting down
#[instrument(skip_all, name = "attendance.handlers.start_lecture")]
pub async fn start_lecture(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StartLectureRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<LectureStatusResponse>), AttendanceError> {
    let Json(request) = payload.map_err(|e| AttendanceError::BadRequest(e.body_text()))?;

    match state
        .sessions
        .start(request.lecture_id, &request.queue)
        .await?
    {
        StartOutcome::Started => Ok((StatusCode::ACCEPTED, status("started"))),
        StartOutcome::AlreadyRunning => Ok((StatusCode::OK, status("already_running"))),
    }
}

/// Handler for `POST /api/lecture/stop`.
///
/// - 200 OK `{"status":"ok"}`
/// - 404 Not Found: no active session for the lecture
#[instrument(skip_all, name = "attendance.handlers.stop_lecture")]
pub async fn stop_lecture(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StopLectureRequest>, JsonRejection>,
) -> Result<Json<LectureStatusResponse>, AttendanceError> {
    let Json(request) = payload.map_err(|e| AttendanceError::BadRequest(e.body_text()))?;

    state.sessions.stop(request.lecture_id).await?;

    Ok(status("ok"))
}

/// Handler for `GET /api/lecture/active`.
pub async fn active_lectures(State(state): State<Arc<AppState>>) -> Json<Vec<ActiveLecture>> {
    Json(state.sessions.active_lectures().await)
}
