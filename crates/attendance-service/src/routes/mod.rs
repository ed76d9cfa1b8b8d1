//! HTTP routes for the Attendance Service.
//!
//! Defines the Axum router and application state.

use crate::handlers;
use crate::hub::SubscriberHub;
use crate::observability::HealthState;
use crate::sessions::LectureSessionManager;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Request timeout for the control API. Not applied to `/ws`.
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: LectureSessionManager,

    pub hub: Arc<SubscriberHub>,

    pub health: Arc<HealthState>,

    /// Outbound queue capacity for each new WebSocket client.
    pub client_queue_capacity: usize,

    /// Process shutdown token; WebSocket connections run with child tokens.
    pub shutdown_token: CancellationToken,

    /// Upgraded WebSocket connections, awaited on shutdown.
    pub connections: TaskTracker,
}

/// Build the application routes.
///
/// - `POST /api/lecture/start`, `POST /api/lecture/stop`,
///   `GET /api/lecture/active` (30 second timeout)
/// - `GET /ws` - WebSocket upgrade
/// - `GET /health`, `GET /ready` - probes
/// - TraceLayer for request logging
///
/// `/metrics` is added by the binary, which owns the Prometheus handle.
pub fn build_routes(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/api/lecture/start", post(handlers::start_lecture))
        .route("/api/lecture/stop", post(handlers::stop_lecture))
        .route("/api/lecture/active", get(handlers::active_lectures))
        .layer(TimeoutLayer::new(API_TIMEOUT))
        .with_state(Arc::clone(&state));

    let socket_routes = Router::new()
        .route("/ws", get(handlers::ws_upgrade))
        .route("/health", get(handlers::liveness))
        .route("/ready", get(handlers::readiness))
        .with_state(state);

    api_routes
        .merge(socket_routes)
        .layer(TraceLayer::new_for_http())
}
