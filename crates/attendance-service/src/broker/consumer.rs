//! Per-lecture broker consumer loop.
//!
//! ```text
//! CONNECTING -> CONSUMING -> CLOSED_CLEAN  (end-of-lecture sentinel) -> done
//!                         -> CLOSED_ERROR  -> backoff -> CONNECTING
//! any state  -> cancelled -> done
//! ```
//!
//! The backoff only resets after an attempt that acknowledged at least one
//! delivery. A broker that accepts the subscription and drops it straight
//! away is retried on the growing schedule.
//!
//! Deliveries are processed and acknowledged in broker order. A presence
//! delivery is acknowledged after the hub has handled it, whether or not the
//! hub succeeded; the sentinel is acknowledged and ends the loop without a
//! reconnect. Every wait (dial, receive, broadcast, backoff sleep) also
//! watches the cancellation token.

use super::{BrokerConnector, BrokerError, BrokerSubscription, ReconnectBackoff};
use crate::config::{
    DEFAULT_BROKER_PREFETCH, DEFAULT_RECONNECT_BACKOFF_INITIAL_MS,
    DEFAULT_RECONNECT_BACKOFF_MAX_MS,
};
use crate::errors::AttendanceError;
use crate::hub::{BroadcastReport, SubscriberHub};
use crate::models::{is_lecture_end, LectureId};
use crate::observability::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Tunables shared by every lecture consumer.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub prefetch: u16,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_BROKER_PREFETCH,
            backoff_initial: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_INITIAL_MS),
            backoff_max: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_MAX_MS),
        }
    }
}

/// Why a consumer loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// The end-of-lecture sentinel was received and acknowledged.
    Finished,
    /// The cancellation token fired.
    Cancelled,
}

/// Result of one connect-and-consume attempt.
enum Attempt {
    Finished,
    Cancelled,
    Failed {
        /// At least one delivery was acknowledged during the attempt.
        acked_any: bool,
        error: BrokerError,
    },
}

/// Consumer loop for one lecture queue.
pub struct LectureConsumer {
    lecture_id: LectureId,
    queue: String,
    connector: Arc<dyn BrokerConnector>,
    hub: Arc<SubscriberHub>,
    settings: ConsumerSettings,
}

impl LectureConsumer {
    pub fn new(
        lecture_id: LectureId,
        queue: String,
        connector: Arc<dyn BrokerConnector>,
        hub: Arc<SubscriberHub>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            lecture_id,
            queue,
            connector,
            hub,
            settings,
        }
    }

    /// Run until the sentinel arrives or `cancel` fires, reconnecting with
    /// backoff after every transport failure.
    #[instrument(
        skip_all,
        name = "attendance.broker.consumer",
        fields(lecture_id = self.lecture_id, queue = %self.queue)
    )]
    pub async fn run(self, cancel: CancellationToken) -> ConsumerExit {
        let mut backoff =
            ReconnectBackoff::new(self.settings.backoff_initial, self.settings.backoff_max);

        loop {
            if cancel.is_cancelled() {
                return ConsumerExit::Cancelled;
            }

            match self.consume_once(&cancel).await {
                Attempt::Finished => {
                    info!(
                        target: "attendance.broker.consumer",
                        lecture_id = self.lecture_id,
                        "End of lecture received, consumer finished"
                    );
                    return ConsumerExit::Finished;
                }
                Attempt::Cancelled => {
                    info!(
                        target: "attendance.broker.consumer",
                        lecture_id = self.lecture_id,
                        "Consumer cancelled"
                    );
                    return ConsumerExit::Cancelled;
                }
                Attempt::Failed { acked_any, error } => {
                    if acked_any {
                        backoff.reset();
                    }
                    let delay = backoff.next_delay();

                    warn!(
                        target: "attendance.broker.consumer",
                        lecture_id = self.lecture_id,
                        queue = %self.queue,
                        error = %error,
                        backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Broker attempt failed, will reconnect"
                    );

                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            info!(
                                target: "attendance.broker.consumer",
                                lecture_id = self.lecture_id,
                                "Consumer cancelled during backoff"
                            );
                            return ConsumerExit::Cancelled;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }

                    metrics::record_consumer_reconnect();
                }
            }
        }
    }

    async fn consume_once(&self, cancel: &CancellationToken) -> Attempt {
        let subscribed = tokio::select! {
            biased;
            () = cancel.cancelled() => return Attempt::Cancelled,
            result = self.connector.subscribe(&self.queue, self.settings.prefetch) => result,
        };

        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(error) => {
                return Attempt::Failed {
                    acked_any: false,
                    error,
                }
            }
        };

        info!(
            target: "attendance.broker.consumer",
            lecture_id = self.lecture_id,
            queue = %self.queue,
            prefetch = self.settings.prefetch,
            "Consuming lecture queue"
        );

        let outcome = self.drain(subscription.as_mut(), cancel).await;
        subscription.close().await;
        outcome
    }

    async fn drain(
        &self,
        subscription: &mut dyn BrokerSubscription,
        cancel: &CancellationToken,
    ) -> Attempt {
        let mut acked_any = false;

        loop {
            let delivery = tokio::select! {
                biased;
                () = cancel.cancelled() => return Attempt::Cancelled,
                next = subscription.next_delivery() => match next {
                    Ok(delivery) => delivery,
                    Err(error) => return Attempt::Failed { acked_any, error },
                },
            };

            if is_lecture_end(delivery.payload()) {
                metrics::record_broker_message("end");
                if let Err(error) = delivery.ack().await {
                    return Attempt::Failed { acked_any, error };
                }
                return Attempt::Finished;
            }

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Attempt::Cancelled,
                result = self.hub.broadcast(self.lecture_id, delivery.payload()) => result,
            };

            metrics::record_broker_message(message_kind(&result));

            match result {
                Ok(report) => {
                    debug!(
                        target: "attendance.broker.consumer",
                        lecture_id = self.lecture_id,
                        delivered = report.delivered,
                        dropped = report.dropped,
                        "Presence processed"
                    );
                }
                Err(AttendanceError::InvalidPayload(reason)) => {
                    warn!(
                        target: "attendance.broker.consumer",
                        lecture_id = self.lecture_id,
                        reason = %reason,
                        "Skipping malformed presence payload"
                    );
                }
                Err(e) => {
                    warn!(
                        target: "attendance.broker.consumer",
                        lecture_id = self.lecture_id,
                        error = %e,
                        "Presence not recorded, event dropped"
                    );
                }
            }

            if let Err(error) = delivery.ack().await {
                return Attempt::Failed { acked_any, error };
            }
            acked_any = true;
        }
    }
}

/// `kind` label of `attendance_broker_messages_total` for a presence delivery.
fn message_kind(result: &Result<BroadcastReport, AttendanceError>) -> &'static str {
    match result {
        Ok(_) => "presence",
        Err(AttendanceError::InvalidPayload(_)) => "invalid",
        Err(_) => "dropped",
    }
}
