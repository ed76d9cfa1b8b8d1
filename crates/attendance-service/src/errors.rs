//! Attendance Service error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Error messages returned to clients are intentionally generic for server-side
//! failures. Actual errors are logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Attendance Service error type.
///
/// Maps to HTTP status codes:
/// - Database, Serialization, Internal: 500 Internal Server Error
/// - RecorderTimeout, ServiceUnavailable: 503 Service Unavailable
/// - NotFound: 404 Not Found
/// - BadRequest, InvalidPayload: 400 Bad Request
#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A broker payload could not be decoded as a presence snapshot.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The recorder did not answer within the configured bound.
    #[error("Attendance recorder timed out after {}ms", .0.as_millis())]
    RecorderTimeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    Internal,
}

impl AttendanceError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AttendanceError::Database(_)
            | AttendanceError::Serialization(_)
            | AttendanceError::Internal => 500,
            AttendanceError::RecorderTimeout(_) | AttendanceError::ServiceUnavailable(_) => 503,
            AttendanceError::NotFound(_) => 404,
            AttendanceError::BadRequest(_) | AttendanceError::InvalidPayload(_) => 400,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for AttendanceError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AttendanceError::Database(err) => {
                tracing::error!(
                    target: "attendance.database",
                    error = %err,
                    "Database operation failed"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            AttendanceError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone())
            }
            AttendanceError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            AttendanceError::InvalidPayload(reason) => {
                (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD", reason.clone())
            }
            AttendanceError::RecorderTimeout(_) | AttendanceError::ServiceUnavailable(_) => {
                tracing::warn!(
                    target: "attendance.availability",
                    error = %self,
                    "Service unavailable"
                );
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            AttendanceError::Serialization(_) | AttendanceError::Internal => {
                tracing::error!(target: "attendance.internal", error = %self, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Convert sqlx errors to `AttendanceError`.
impl From<sqlx::Error> for AttendanceError {
    fn from(err: sqlx::Error) -> Self {
        AttendanceError::Database(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            AttendanceError::NotFound("Lecture not found".to_string()).to_string(),
            "Not found: Lecture not found"
        );
        assert_eq!(
            AttendanceError::BadRequest("Invalid queue name".to_string()).to_string(),
            "Bad request: Invalid queue name"
        );
        assert_eq!(
            AttendanceError::RecorderTimeout(Duration::from_secs(5)).to_string(),
            "Attendance recorder timed out after 5000ms"
        );
        assert_eq!(AttendanceError::Internal.to_string(), "Internal server error");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AttendanceError::Database("x".to_string()).status_code(), 500);
        assert_eq!(AttendanceError::NotFound("x".to_string()).status_code(), 404);
        assert_eq!(AttendanceError::BadRequest("x".to_string()).status_code(), 400);
        assert_eq!(
            AttendanceError::InvalidPayload("x".to_string()).status_code(),
            400
        );
        assert_eq!(
            AttendanceError::RecorderTimeout(Duration::from_secs(1)).status_code(),
            503
        );
        assert_eq!(
            AttendanceError::ServiceUnavailable("x".to_string()).status_code(),
            503
        );
        assert_eq!(
            AttendanceError::Serialization("x".to_string()).status_code(),
            500
        );
        assert_eq!(AttendanceError::Internal.status_code(), 500);
    }

    #[test]
    fn test_from_sqlx_error() {
        let error: AttendanceError = sqlx::Error::RowNotFound.into();
        assert!(matches!(error, AttendanceError::Database(_)));
    }

    #[tokio::test]
    async fn test_into_response_not_found() {
        let response = AttendanceError::NotFound("Lecture not found".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "Lecture not found");
    }

    #[tokio::test]
    async fn test_into_response_database_error_is_generic() {
        let response =
            AttendanceError::Database("relation does not exist".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "DATABASE_ERROR");
        assert_eq!(
            body["error"]["message"],
            "An internal database error occurred"
        );
    }

    #[tokio::test]
    async fn test_into_response_recorder_timeout() {
        let response =
            AttendanceError::RecorderTimeout(Duration::from_secs(5)).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
        assert_eq!(body["error"]["message"], "Service temporarily unavailable");
    }

    #[tokio::test]
    async fn test_into_response_bad_request() {
        let response =
            AttendanceError::BadRequest("Invalid queue name".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
        assert_eq!(body["error"]["message"], "Invalid queue name");
    }
}
