//! Subscriber hub.
//!
//! Tracks which WebSocket clients watch which lecture and fans enriched
//! attendance events out to them.
//!
//! # Delivery
//!
//! Every presence snapshot is recorded first, even when nobody is watching.
//! The subscriber set is then snapshotted under the lock and the lock is
//! released before any send. Sends are non-blocking: a client whose queue is
//! full (or already closed) misses that event and the drop is counted.

use crate::errors::AttendanceError;
use crate::models::{AttendanceEvent, LectureId, PresenceSnapshot};
use crate::observability::metrics;
use crate::recorder::AttendanceRecorder;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Identifier of one WebSocket connection.
pub type ClientId = Uuid;

/// Sending half of a client's outbound queue.
///
/// Cloned into the hub on subscribe; the receiving half is owned by the
/// connection's outbound pump.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    sender: mpsc::Sender<String>,
}

impl ClientHandle {
    /// Create a client with a fresh id and a bounded outbound queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                sender,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients whose queue accepted the event.
    pub delivered: usize,
    /// Clients that missed the event (queue full or closed).
    pub dropped: usize,
}

/// Lecture subscription registry and fanout.
pub struct SubscriberHub {
    lectures: Mutex<HashMap<LectureId, HashMap<ClientId, ClientHandle>>>,
    recorder: Arc<dyn AttendanceRecorder>,
    record_timeout: Duration,
}

impl SubscriberHub {
    pub fn new(recorder: Arc<dyn AttendanceRecorder>, record_timeout: Duration) -> Self {
        Self {
            lectures: Mutex::new(HashMap::new()),
            recorder,
            record_timeout,
        }
    }

    /// Subscribe `client` to `lecture_id`. Subscribing twice is a no-op.
    pub async fn subscribe(&self, client: &ClientHandle, lecture_id: LectureId) {
        let mut lectures = self.lectures.lock().await;
        lectures
            .entry(lecture_id)
            .or_default()
            .entry(client.id)
            .or_insert_with(|| client.clone());

        debug!(
            target: "attendance.hub",
            client_id = %client.id,
            lecture_id = lecture_id,
            "Client subscribed"
        );
    }

    /// Remove `client_id` from `lecture_id`, pruning the lecture when empty.
    pub async fn unsubscribe(&self, client_id: ClientId, lecture_id: LectureId) {
        let mut lectures = self.lectures.lock().await;
        if let Some(clients) = lectures.get_mut(&lecture_id) {
            clients.remove(&client_id);
            if clients.is_empty() {
                lectures.remove(&lecture_id);
            }
        }

        debug!(
            target: "attendance.hub",
            client_id = %client_id,
            lecture_id = lecture_id,
            "Client unsubscribed"
        );
    }

    /// Remove `client_id` from every lecture. Called when a socket closes.
    pub async fn remove_client(&self, client_id: ClientId) {
        let mut lectures = self.lectures.lock().await;
        lectures.retain(|_, clients| {
            clients.remove(&client_id);
            !clients.is_empty()
        });
    }

    /// Number of clients subscribed to `lecture_id`.
    pub async fn subscriber_count(&self, lecture_id: LectureId) -> usize {
        self.lectures
            .lock()
            .await
            .get(&lecture_id)
            .map_or(0, HashMap::len)
    }

    /// Number of lectures with at least one subscriber.
    pub async fn lecture_count(&self) -> usize {
        self.lectures.lock().await.len()
    }

    /// Record a raw presence payload and fan the enriched event out.
    ///
    /// # Errors
    ///
    /// - `InvalidPayload` if the payload is not a presence snapshot
    /// - any recorder error, including `RecorderTimeout`
    /// - `Serialization` if the event cannot be encoded
    ///
    /// On error nothing is sent to subscribers.
    #[instrument(skip_all, name = "attendance.hub.broadcast", fields(lecture_id = lecture_id))]
    pub async fn broadcast(
        &self,
        lecture_id: LectureId,
        payload: &[u8],
    ) -> Result<BroadcastReport, AttendanceError> {
        let snapshot: PresenceSnapshot = serde_json::from_slice(payload)
            .map_err(|e| AttendanceError::InvalidPayload(e.to_string()))?;

        if snapshot.person_id.trim().is_empty() {
            return Err(AttendanceError::InvalidPayload(
                "person_id must not be empty".to_string(),
            ));
        }

        if let Some(embedded) = snapshot.lecture_id {
            if embedded != lecture_id {
                warn!(
                    target: "attendance.hub",
                    lecture_id = lecture_id,
                    payload_lecture_id = embedded,
                    "Payload lecture_id does not match the queue's lecture, ignoring it"
                );
            }
        }

        let event = self.record(lecture_id, &snapshot.person_id).await?;
        let text = serde_json::to_string(&event)
            .map_err(|e| AttendanceError::Serialization(e.to_string()))?;

        let targets: Vec<ClientHandle> = {
            let lectures = self.lectures.lock().await;
            lectures
                .get(&lecture_id)
                .map(|clients| clients.values().cloned().collect())
                .unwrap_or_default()
        };

        let mut report = BroadcastReport::default();
        for client in &targets {
            match client.sender.try_send(text.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    debug!(
                        target: "attendance.hub",
                        client_id = %client.id,
                        lecture_id = lecture_id,
                        "Client queue full, event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => report.dropped += 1,
            }
        }

        metrics::record_hub_drops(report.dropped);

        debug!(
            target: "attendance.hub",
            lecture_id = lecture_id,
            delivered = report.delivered,
            dropped = report.dropped,
            "Attendance event broadcast"
        );

        Ok(report)
    }

    async fn record(
        &self,
        lecture_id: LectureId,
        person_id: &str,
    ) -> Result<AttendanceEvent, AttendanceError> {
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.record_timeout,
            self.recorder.record(lecture_id, person_id),
        )
        .await;

        match result {
            Ok(Ok(event)) => {
                metrics::record_attendance("success", started.elapsed());
                Ok(event)
            }
            Ok(Err(e)) => {
                metrics::record_attendance("error", started.elapsed());
                Err(e)
            }
            Err(_) => {
                metrics::record_attendance("timeout", started.elapsed());
                Err(AttendanceError::RecorderTimeout(self.record_timeout))
            }
        }
    }
}
