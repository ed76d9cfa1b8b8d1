//! Broker seam.
//!
//! The consumer loop talks to the broker only through [`BrokerConnector`]
//! and [`BrokerSubscription`]. [`amqp`] is the production implementation;
//! tests substitute an in-memory broker.
//!
//! Deliveries are acknowledged manually and the number of unacknowledged
//! deliveries in flight is bounded by the prefetch passed to `subscribe`.

pub mod amqp;
pub mod backoff;
pub mod consumer;

pub use amqp::AmqpConnector;
pub use backoff::ReconnectBackoff;
pub use consumer::{ConsumerExit, ConsumerSettings, LectureConsumer};

use std::fmt;
use thiserror::Error;

/// Broker transport failures. All of them are recoverable by reconnecting.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    Connect(String),

    #[error("Broker channel error: {0}")]
    Channel(String),

    #[error("Failed to consume queue: {0}")]
    Consume(String),

    #[error("Failed to acknowledge delivery: {0}")]
    Ack(String),

    #[error("Broker connection closed: {0}")]
    Closed(String),
}

/// Acknowledges one delivery on the channel it arrived on.
#[async_trait::async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
}

/// One message taken from a lecture queue, not yet acknowledged.
pub struct BrokerDelivery {
    payload: Vec<u8>,
    acker: Box<dyn DeliveryAcker>,
}

impl BrokerDelivery {
    pub fn new(payload: Vec<u8>, acker: Box<dyn DeliveryAcker>) -> Self {
        Self { payload, acker }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledge the delivery, consuming it.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Ack` (or `Closed`) if the channel is gone.
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }
}

impl fmt::Debug for BrokerDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerDelivery")
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// An open consumer on one queue.
#[async_trait::async_trait]
pub trait BrokerSubscription: Send {
    /// Wait for the next delivery.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Closed` when the connection or channel goes away,
    /// including a forced close by the broker.
    async fn next_delivery(&mut self) -> Result<BrokerDelivery, BrokerError>;

    /// Close the channel and connection. Errors are logged, not returned.
    async fn close(&mut self);
}

/// Dials the broker and opens consumers.
#[async_trait::async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Connect, open a channel, apply `prefetch` and start consuming `queue`
    /// with manual acknowledgement.
    async fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn BrokerSubscription>, BrokerError>;
}
