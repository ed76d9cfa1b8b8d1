//! Health probe handlers.
//!
//! - `GET /health` - Liveness (is the process running?)
//! - `GET /ready` - Readiness (false once shutdown begins)
//!
//! Both report the number of running lectures and watched lectures.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

async fn snapshot(state: &AppState, status: &str) -> HealthResponse {
    HealthResponse {
        status: status.to_string(),
        active_lectures: state.sessions.active_count().await,
        watched_lectures: state.hub.lecture_count().await,
    }
}

/// Liveness probe handler.
pub async fn liveness(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    if state.health.is_live() {
        (StatusCode::OK, Json(snapshot(&state, "healthy").await))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(snapshot(&state, "unhealthy").await),
        )
    }
}

/// Readiness probe handler.
///
/// Returns 503 with status "draining" while shutting down or before startup
/// has completed.
pub async fn readiness(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    if state.health.is_ready() {
        (StatusCode::OK, Json(snapshot(&state, "healthy").await))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(snapshot(&state, "draining").await),
        )
    }
}
