//! AMQP 0-9-1 implementation of the broker seam (RabbitMQ via `lapin`).
//!
//! Each subscription owns its own connection and channel, so a failure on
//! one lecture's queue never affects another lecture.

use super::{BrokerConnector, BrokerDelivery, BrokerError, BrokerSubscription, DeliveryAcker};
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Reply code sent when closing a connection normally.
const REPLY_SUCCESS: u16 = 200;

/// Opens `lapin` consumers against one broker URL.
#[derive(Clone)]
pub struct AmqpConnector {
    uri: SecretString,
}

impl AmqpConnector {
    pub fn new(uri: SecretString) -> Self {
        Self { uri }
    }
}

#[async_trait::async_trait]
impl BrokerConnector for AmqpConnector {
    async fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        let connection =
            Connection::connect(self.uri.expose_secret(), ConnectionProperties::default())
                .await
                .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        connection.on_error(move |err| {
            let _ = closed_tx.send(err.to_string());
        });

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;

        // Empty consumer tag: the broker generates one.
        let consumer = channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        debug!(
            target: "attendance.broker.amqp",
            queue = %queue,
            prefetch = prefetch,
            "AMQP consumer opened"
        );

        Ok(Box::new(AmqpSubscription {
            connection,
            channel,
            consumer,
            closed_rx,
        }))
    }
}

struct AmqpSubscription {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    closed_rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait::async_trait]
impl BrokerSubscription for AmqpSubscription {
    async fn next_delivery(&mut self) -> Result<BrokerDelivery, BrokerError> {
        tokio::select! {
            reason = self.closed_rx.recv() => {
                Err(BrokerError::Closed(
                    reason.unwrap_or_else(|| "connection dropped".to_string()),
                ))
            }
            next = self.consumer.next() => match next {
                Some(Ok(delivery)) => Ok(BrokerDelivery::new(
                    delivery.data,
                    Box::new(AmqpAcker {
                        acker: delivery.acker,
                    }),
                )),
                Some(Err(e)) => Err(BrokerError::Consume(e.to_string())),
                None => Err(BrokerError::Closed("consumer stream ended".to_string())),
            },
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "OK").await {
            debug!(target: "attendance.broker.amqp", error = %e, "Channel close failed");
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "OK").await {
            warn!(target: "attendance.broker.amqp", error = %e, "Connection close failed");
        }
    }
}

struct AmqpAcker {
    acker: Acker,
}

#[async_trait::async_trait]
impl DeliveryAcker for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }
}
