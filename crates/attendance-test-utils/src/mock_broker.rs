//! In-memory broker for consumer loop tests.
//!
//! Models the parts of AMQP the consumer relies on:
//! - dialing can be made to fail (`set_reachable(false)`)
//! - each queue delivers in publish order
//! - at most `prefetch` unacknowledged deliveries per subscription
//! - closing a subscription (or `force_close`) requeues its unacknowledged
//!   deliveries at the front of the queue
//! - acknowledging on a closed subscription fails
//!
//! Dial times are taken from `tokio::time::Instant`, so they are meaningful
//! under paused time.
//!
//! # Example
//!
//! ```rust,ignore
//! let broker = MockBroker::unreachable();
//! // ... start a consumer, advance time ...
//! assert!(broker.dial_count() >= 2);
//! broker.set_reachable(true);
//! ```

use attendance_service::broker::{
    BrokerConnector, BrokerDelivery, BrokerError, BrokerSubscription, DeliveryAcker,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::Instant;

/// In-memory broker shared between a test and the code under test.
#[derive(Clone)]
pub struct MockBroker {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<BrokerState>,
    /// Bumped on every state change that may unblock a waiting consumer.
    changes: watch::Sender<u64>,
}

impl Shared {
    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }
}

#[derive(Default)]
struct BrokerState {
    reachable: bool,
    dial_times: Vec<Instant>,
    last_prefetch: Option<u16>,
    next_subscription: u64,
    /// Open subscriptions: id -> (queue, prefetch).
    open: HashMap<u64, (String, u16)>,
    queues: HashMap<String, QueueState>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Vec<u8>>,
    /// Delivery tag -> (subscription id, payload).
    unacked: BTreeMap<u64, (u64, Vec<u8>)>,
    acked: Vec<Vec<u8>>,
    next_tag: u64,
}

impl BrokerState {
    /// Close a subscription and put its unacknowledged deliveries back at
    /// the front of the queue, preserving their order.
    fn close_subscription(&mut self, id: u64) {
        let Some((queue_name, _)) = self.open.remove(&id) else {
            return;
        };
        let Some(queue) = self.queues.get_mut(&queue_name) else {
            return;
        };

        let tags: Vec<u64> = queue
            .unacked
            .iter()
            .filter(|(_, (subscription, _))| *subscription == id)
            .map(|(tag, _)| *tag)
            .collect();

        for tag in tags.into_iter().rev() {
            if let Some((_, payload)) = queue.unacked.remove(&tag) {
                queue.pending.push_front(payload);
            }
        }
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    /// A reachable broker with no queues.
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState {
                    reachable: true,
                    ..BrokerState::default()
                }),
                changes,
            }),
        }
    }

    /// A broker that refuses every dial until `set_reachable(true)`.
    pub fn unreachable() -> Self {
        let broker = Self::new();
        broker.set_reachable(false);
        broker
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.shared.state.lock().unwrap().reachable = reachable;
    }

    /// Append a message to `queue`.
    pub fn publish(&self, queue: &str, payload: impl Into<Vec<u8>>) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .pending
                .push_back(payload.into());
        }
        self.shared.notify();
    }

    /// Close every open subscription on `queue`, as a broker-side forced
    /// close would. Unacknowledged deliveries are requeued.
    pub fn force_close(&self, queue: &str) {
        {
            let mut state = self.shared.state.lock().unwrap();
            let ids: Vec<u64> = state
                .open
                .iter()
                .filter(|(_, (name, _))| name == queue)
                .map(|(id, _)| *id)
                .collect();
            for id in ids {
                state.close_subscription(id);
            }
        }
        self.shared.notify();
    }

    /// Number of dial attempts so far, successful or not.
    pub fn dial_count(&self) -> usize {
        self.shared.state.lock().unwrap().dial_times.len()
    }

    /// Instants of every dial attempt.
    pub fn dial_times(&self) -> Vec<Instant> {
        self.shared.state.lock().unwrap().dial_times.clone()
    }

    /// Prefetch requested by the most recent successful dial.
    pub fn last_prefetch(&self) -> Option<u16> {
        self.shared.state.lock().unwrap().last_prefetch
    }

    /// Number of open subscriptions on `queue`.
    pub fn active_subscriptions(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .unwrap()
            .open
            .values()
            .filter(|(name, _)| name == queue)
            .count()
    }

    /// Payloads acknowledged on `queue`, in acknowledgement order.
    pub fn acked(&self, queue: &str) -> Vec<Vec<u8>> {
        self.shared
            .state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.acked.clone())
            .unwrap_or_default()
    }

    /// Messages on `queue` not yet delivered.
    pub fn pending(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map_or(0, |q| q.pending.len())
    }

    /// Deliveries on `queue` handed out but not acknowledged.
    pub fn unacked(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }
}

#[async_trait::async_trait]
impl BrokerConnector for MockBroker {
    async fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        let id = {
            let mut state = self.shared.state.lock().unwrap();
            state.dial_times.push(Instant::now());

            if !state.reachable {
                return Err(BrokerError::Connect("connection refused".to_string()));
            }

            let id = state.next_subscription;
            state.next_subscription += 1;
            state.last_prefetch = Some(prefetch);
            state.open.insert(id, (queue.to_string(), prefetch));
            state.queues.entry(queue.to_string()).or_default();
            id
        };

        Ok(Box::new(MockSubscription {
            shared: Arc::clone(&self.shared),
            changes: self.shared.changes.subscribe(),
            queue: queue.to_string(),
            id,
        }))
    }
}

struct MockSubscription {
    shared: Arc<Shared>,
    changes: watch::Receiver<u64>,
    queue: String,
    id: u64,
}

impl MockSubscription {
    fn try_take(&self) -> Result<Option<BrokerDelivery>, BrokerError> {
        let mut state = self.shared.state.lock().unwrap();

        let Some((_, prefetch)) = state.open.get(&self.id).cloned() else {
            return Err(BrokerError::Closed("channel closed by broker".to_string()));
        };

        let queue = state.queues.entry(self.queue.clone()).or_default();
        let in_flight = queue
            .unacked
            .values()
            .filter(|(subscription, _)| *subscription == self.id)
            .count();
        if in_flight >= usize::from(prefetch) {
            return Ok(None);
        }

        let Some(payload) = queue.pending.pop_front() else {
            return Ok(None);
        };

        let tag = queue.next_tag;
        queue.next_tag += 1;
        queue.unacked.insert(tag, (self.id, payload.clone()));

        Ok(Some(BrokerDelivery::new(
            payload,
            Box::new(MockAcker {
                shared: Arc::clone(&self.shared),
                queue: self.queue.clone(),
                subscription: self.id,
                tag,
            }),
        )))
    }
}

#[async_trait::async_trait]
impl BrokerSubscription for MockSubscription {
    async fn next_delivery(&mut self) -> Result<BrokerDelivery, BrokerError> {
        loop {
            // Mark the current version seen before looking at the state so a
            // change made after the check still wakes us up.
            self.changes.borrow_and_update();

            if let Some(delivery) = self.try_take()? {
                return Ok(delivery);
            }

            if self.changes.changed().await.is_err() {
                return Err(BrokerError::Closed("broker dropped".to_string()));
            }
        }
    }

    async fn close(&mut self) {
        self.shared.state.lock().unwrap().close_subscription(self.id);
        self.shared.notify();
    }
}

struct MockAcker {
    shared: Arc<Shared>,
    queue: String,
    subscription: u64,
    tag: u64,
}

#[async_trait::async_trait]
impl DeliveryAcker for MockAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.state.lock().unwrap();

            if !state.open.contains_key(&self.subscription) {
                return Err(BrokerError::Ack("channel closed".to_string()));
            }

            let queue = state
                .queues
                .get_mut(&self.queue)
                .ok_or_else(|| BrokerError::Ack("unknown queue".to_string()))?;
            let (_, payload) = queue
                .unacked
                .remove(&self.tag)
                .ok_or_else(|| BrokerError::Ack("unknown delivery tag".to_string()))?;
            queue.acked.push(payload);
        }
        self.shared.notify();
        Ok(())
    }
}
