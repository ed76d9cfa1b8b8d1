//! WebSocket upgrade handler (`GET /ws`).

use crate::errors::AttendanceError;
use crate::routes::AppState;
use crate::ws::serve_socket;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use std::sync::Arc;

/// Control frames are tiny; anything larger is a misbehaving client.
const MAX_CONTROL_FRAME_BYTES: usize = 64 * 1024;

/// Upgrade to a WebSocket and hand the socket to a client connection.
///
/// The connection is tracked so shutdown can wait for its close frame.
///
/// # Errors
///
/// Returns 503 once shutdown has begun.
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Result<Response, AttendanceError> {
    if state.shutdown_token.is_cancelled() {
        return Err(AttendanceError::ServiceUnavailable(
            "Service is shutting down".to_string(),
        ));
    }

    let hub = Arc::clone(&state.hub);
    let capacity = state.client_queue_capacity;
    let shutdown = state.shutdown_token.clone();
    let connections = state.connections.clone();

    Ok(ws
        .max_message_size(MAX_CONTROL_FRAME_BYTES)
        .on_upgrade(move |socket| {
            connections.track_future(serve_socket(socket, hub, capacity, shutdown))
        }))
}
