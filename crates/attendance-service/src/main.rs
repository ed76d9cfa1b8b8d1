//! Attendance Service
//!
//! Streams lecture attendance from per-lecture broker queues to WebSocket
//! viewers, recording every presence snapshot in Postgres.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect the database pool
//! 4. Build recorder, hub and lecture session manager
//! 5. Bind the HTTP/WebSocket listener and mark ready
//! 6. Wait for shutdown signal
//!
//! # Shutdown
//!
//! Readiness drops first, then the shutdown token is cancelled (closing
//! every WebSocket and stopping the listener). Consumer loops and open
//! WebSocket connections are each given `SHUTDOWN_DEADLINE_SECONDS` to exit,
//! and the pool is closed last.

use attendance_service::broker::{AmqpConnector, ConsumerSettings};
use attendance_service::config::Config;
use attendance_service::hub::SubscriberHub;
use attendance_service::observability::{init_metrics_recorder, HealthState};
use attendance_service::recorder::PgAttendanceRecorder;
use attendance_service::routes::{self, AppState};
use attendance_service::sessions::LectureSessionManager;
use attendance_service::ws::drain_connections;
use axum::routing::get;
use axum::Router;
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Postgres statement timeout applied to every pooled connection.
const STATEMENT_TIMEOUT_SECS: u32 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attendance_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Attendance Service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        broker_prefetch = config.broker_prefetch,
        client_queue_capacity = config.client_queue_capacity,
        record_timeout_ms = u64::try_from(config.record_timeout.as_millis()).unwrap_or(u64::MAX),
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    info!("Connecting to database...");
    let db_url = add_query_timeout(config.database_url.expose_secret(), STATEMENT_TIMEOUT_SECS);
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&db_url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;
    info!("Database connection established");

    let shutdown_token = CancellationToken::new();

    let recorder = Arc::new(PgAttendanceRecorder::new(db_pool.clone()));
    let hub = Arc::new(SubscriberHub::new(recorder, config.record_timeout));
    let connector = Arc::new(AmqpConnector::new(config.amqp_url.clone()));
    let sessions = LectureSessionManager::new(
        connector,
        Arc::clone(&hub),
        ConsumerSettings {
            prefetch: config.broker_prefetch,
            backoff_initial: config.reconnect_backoff_initial,
            backoff_max: config.reconnect_backoff_max,
        },
        shutdown_token.child_token(),
    );

    let connections = TaskTracker::new();

    let state = Arc::new(AppState {
        sessions: sessions.clone(),
        hub,
        health: Arc::clone(&health_state),
        client_queue_capacity: config.client_queue_capacity,
        shutdown_token: shutdown_token.clone(),
        connections: connections.clone(),
    });

    let metrics_router = Router::new().route(
        "/metrics",
        get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = routes::build_routes(state).merge(metrics_router);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    // Bind before marking ready so bind errors abort startup
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind listener");
        e
    })?;
    info!("Attendance Service listening on {}", addr);

    let server_token = shutdown_token.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                server_token.cancelled().await;
                info!("HTTP server shutting down");
            })
            .await
    });

    health_state.set_ready();

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    health_state.set_not_ready();
    shutdown_token.cancel();

    sessions.shutdown(config.shutdown_deadline).await;

    // Upgraded sockets outlive axum's graceful shutdown; wait for their close frames
    drain_connections(&connections, config.shutdown_deadline).await;

    match tokio::time::timeout(config.shutdown_deadline, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "HTTP server failed"),
        Ok(Err(e)) => error!(error = ?e, "HTTP server task panicked"),
        Err(_) => warn!("HTTP server did not drain before the shutdown deadline"),
    }

    db_pool.close().await;

    info!("Attendance Service shutdown complete");
    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Adds statement_timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}options=-c%20statement_timeout%3D{timeout_secs}s")
}
