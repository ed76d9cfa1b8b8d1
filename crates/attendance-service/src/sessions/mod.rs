//! Lecture session lifecycle.
//!
//! [`LectureSessionManager`] owns the map `lecture_id -> running consumer`.
//! Start and stop are idempotent and safe to call concurrently: the map is
//! checked and updated under one lock, so at most one consumer per lecture
//! is ever spawned. The lock is never held across broker or database I/O.
//!
//! Every consumer runs with a child of the manager's root token, so
//! [`LectureSessionManager::shutdown`] stops all of them at once.

use crate::broker::{BrokerConnector, ConsumerExit, ConsumerSettings, LectureConsumer};
use crate::errors::AttendanceError;
use crate::hub::SubscriberHub;
use crate::models::{ActiveLecture, LectureId};
use crate::observability::metrics;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long `stop` lets a cancelled consumer wind down before logging it.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a successful `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new consumer was spawned.
    Started,
    /// A consumer for this lecture was already running; nothing changed.
    AlreadyRunning,
}

struct LectureSession {
    queue: String,
    /// Distinguishes this session from a later one for the same lecture.
    generation: u64,
    cancel_token: CancellationToken,
    task_handle: JoinHandle<()>,
}

struct ManagerInner {
    sessions: Mutex<HashMap<LectureId, LectureSession>>,
    next_generation: AtomicU64,
    connector: Arc<dyn BrokerConnector>,
    hub: Arc<SubscriberHub>,
    settings: ConsumerSettings,
    root_token: CancellationToken,
}

impl ManagerInner {
    /// Drop the entry of a consumer that finished on its own, unless a newer
    /// session for the same lecture has replaced it.
    async fn remove_finished(&self, lecture_id: LectureId, generation: u64) {
        let mut sessions = self.sessions.lock().await;
        let is_current = sessions
            .get(&lecture_id)
            .is_some_and(|session| session.generation == generation);

        if is_current {
            sessions.remove(&lecture_id);
            metrics::set_sessions_active(sessions.len());
            info!(
                target: "attendance.sessions",
                lecture_id = lecture_id,
                "Lecture session ended"
            );
        }
    }
}

/// Registry of running lecture consumers.
#[derive(Clone)]
pub struct LectureSessionManager {
    inner: Arc<ManagerInner>,
}

impl LectureSessionManager {
    /// Create a manager. `root_token` is the parent of every consumer's token.
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        hub: Arc<SubscriberHub>,
        settings: ConsumerSettings,
        root_token: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                sessions: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                connector,
                hub,
                settings,
                root_token,
            }),
        }
    }

    /// Start consuming `queue` for `lecture_id`.
    ///
    /// Returns as soon as the consumer is spawned; an unreachable broker does
    /// not fail the call, the consumer keeps retrying in the background.
    ///
    /// # Errors
    ///
    /// - `BadRequest` if `queue` is empty or blank
    /// - `ServiceUnavailable` once shutdown has begun
    pub async fn start(
        &self,
        lecture_id: LectureId,
        queue: &str,
    ) -> Result<StartOutcome, AttendanceError> {
        if queue.trim().is_empty() {
            return Err(AttendanceError::BadRequest("Invalid queue name".to_string()));
        }

        let mut sessions = self.inner.sessions.lock().await;

        if self.inner.root_token.is_cancelled() {
            return Err(AttendanceError::ServiceUnavailable(
                "Service is shutting down".to_string(),
            ));
        }

        if let Some(existing) = sessions.get(&lecture_id) {
            debug!(
                target: "attendance.sessions",
                lecture_id = lecture_id,
                queue = %existing.queue,
                "Lecture already running"
            );
            return Ok(StartOutcome::AlreadyRunning);
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel_token = self.inner.root_token.child_token();
        let consumer = LectureConsumer::new(
            lecture_id,
            queue.to_string(),
            Arc::clone(&self.inner.connector),
            Arc::clone(&self.inner.hub),
            self.inner.settings,
        );

        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let token = cancel_token.clone();
        let task_handle = tokio::spawn(async move {
            if consumer.run(token).await == ConsumerExit::Finished {
                if let Some(inner) = weak.upgrade() {
                    inner.remove_finished(lecture_id, generation).await;
                }
            }
        });

        sessions.insert(
            lecture_id,
            LectureSession {
                queue: queue.to_string(),
                generation,
                cancel_token,
                task_handle,
            },
        );
        metrics::set_sessions_active(sessions.len());

        info!(
            target: "attendance.sessions",
            lecture_id = lecture_id,
            queue = %queue,
            active_lectures = sessions.len(),
            "Lecture session started"
        );

        Ok(StartOutcome::Started)
    }

    /// Stop the consumer for `lecture_id`.
    ///
    /// The consumer observes cancellation at its next wait point and never
    /// reconnects afterwards.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no session is active; nothing is changed.
    pub async fn stop(&self, lecture_id: LectureId) -> Result<(), AttendanceError> {
        let session = {
            let mut sessions = self.inner.sessions.lock().await;
            let session = sessions
                .remove(&lecture_id)
                .ok_or_else(|| AttendanceError::NotFound("Lecture not found".to_string()))?;
            metrics::set_sessions_active(sessions.len());
            session
        };

        session.cancel_token.cancel();

        info!(
            target: "attendance.sessions",
            lecture_id = lecture_id,
            queue = %session.queue,
            "Lecture session stopped"
        );

        // Reap the task in the background so stop returns immediately.
        let task_handle = session.task_handle;
        tokio::spawn(async move {
            match tokio::time::timeout(STOP_JOIN_TIMEOUT, task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "attendance.sessions",
                        lecture_id = lecture_id,
                        error = ?e,
                        "Consumer task panicked"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "attendance.sessions",
                        lecture_id = lecture_id,
                        "Consumer task did not exit in time"
                    );
                }
            }
        });

        Ok(())
    }

    /// Active sessions, ordered by lecture id.
    pub async fn active_lectures(&self) -> Vec<ActiveLecture> {
        let sessions = self.inner.sessions.lock().await;
        let mut active: Vec<ActiveLecture> = sessions
            .iter()
            .map(|(lecture_id, session)| ActiveLecture {
                lecture_id: *lecture_id,
                queue: session.queue.clone(),
            })
            .collect();
        active.sort_by_key(|lecture| lecture.lecture_id);
        active
    }

    pub async fn is_running(&self, lecture_id: LectureId) -> bool {
        self.inner.sessions.lock().await.contains_key(&lecture_id)
    }

    pub async fn active_count(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    /// Cancel every consumer, clear the map and wait up to `deadline` for the
    /// consumer tasks to exit. Later `start` calls are refused.
    pub async fn shutdown(&self, deadline: Duration) {
        self.inner.root_token.cancel();

        let drained: Vec<(LectureId, LectureSession)> = {
            let mut sessions = self.inner.sessions.lock().await;
            let drained = sessions.drain().collect();
            metrics::set_sessions_active(0);
            drained
        };

        info!(
            target: "attendance.sessions",
            sessions = drained.len(),
            deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            "Shutting down lecture sessions"
        );

        let handles = drained.into_iter().map(|(_, session)| {
            session.cancel_token.cancel();
            session.task_handle
        });

        match tokio::time::timeout(deadline, futures::future::join_all(handles)).await {
            Ok(results) => {
                let panicked = results.iter().filter(|result| result.is_err()).count();
                if panicked > 0 {
                    warn!(
                        target: "attendance.sessions",
                        panicked = panicked,
                        "Some consumer tasks panicked"
                    );
                }
                info!(target: "attendance.sessions", "All lecture sessions stopped");
            }
            Err(_) => {
                warn!(
                    target: "attendance.sessions",
                    "Shutdown deadline reached before all consumers exited"
                );
            }
        }
    }
}
