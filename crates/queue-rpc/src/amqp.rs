//! AMQP 0-9-1 broker backend over lapin.
//!
//! Exercised end to end against a live broker; the unit suites run on
//! [`crate::MemoryBroker`] instead.

use crate::broker::{Broker, BrokerChannel, Delivery, Publication};
use crate::error::TransportError;
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info};

/// Shared AMQP connection.
pub struct AmqpBroker {
    url: String,
    connection: RwLock<Connection>,
}

impl AmqpBroker {
    /// Connect to the broker at `url` (an `amqp://` URI).
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let connection = open(url).await?;
        info!(url, "connected to broker");
        Ok(Self {
            url: url.to_string(),
            connection: RwLock::new(connection),
        })
    }
}

async fn open(url: &str) -> Result<Connection, TransportError> {
    Connection::connect(url, ConnectionProperties::default())
        .await
        .map_err(|e| {
            error!(url, error = %e, "broker connection failed");
            TransportError::Connect
        })
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError> {
        let connection = self.connection.read().await;
        let channel = connection.create_channel().await.map_err(|e| {
            debug!(error = %e, "channel open failed");
            TransportError::OpenChannel
        })?;
        Ok(Box::new(AmqpChannel { channel }))
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let mut connection = self.connection.write().await;
        let fresh = open(&self.url).await?;
        let stale = std::mem::replace(&mut *connection, fresh);
        if let Err(e) = stale.close(200, "replaced").await {
            debug!(error = %e, "stale connection close failed");
        }
        info!(url = %self.url, "reconnected to broker");
        Ok(())
    }
}

struct AmqpChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn consumer_count(&self, queue: &str) -> Result<Option<u32>, TransportError> {
        let options = QueueDeclareOptions {
            passive: true,
            ..QueueDeclareOptions::default()
        };
        match self
            .channel
            .queue_declare(queue, options, FieldTable::default())
            .await
        {
            Ok(state) => Ok(Some(state.consumer_count())),
            // Passive declare of an absent queue fails (and takes the
            // channel with it); either way nobody is serving it.
            Err(e) => {
                debug!(queue, error = %e, "queue probe failed");
                Ok(Some(0))
            }
        }
    }

    async fn declare_reply_queue(&self, name: &str) -> Result<(), TransportError> {
        let options = QueueDeclareOptions {
            durable: false,
            exclusive: true,
            auto_delete: true,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(name, options, FieldTable::default())
            .await
            .map_err(|e| {
                error!(queue = name, error = %e, "reply queue declaration failed");
                TransportError::DeclareQueue
            })?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>, TransportError> {
        let options = BasicConsumeOptions {
            no_ack: true,
            ..BasicConsumeOptions::default()
        };
        let mut consumer = self
            .channel
            .basic_consume(queue, "", options, FieldTable::default())
            .await
            .map_err(|e| {
                error!(queue, error = %e, "consumer registration failed");
                TransportError::RegisterConsumer
            })?;

        let (tx, rx) = mpsc::channel(64);
        let queue = queue.to_string();
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        debug!(queue = %queue, error = %e, "consumer stream error");
                        break;
                    }
                };
                let correlation_id = delivery
                    .properties
                    .correlation_id()
                    .as_ref()
                    .map(|id| id.as_str().to_string())
                    .unwrap_or_default();
                let message = Delivery {
                    correlation_id,
                    body: delivery.data,
                };
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            // Sender drop ends the reply stream.
        });
        Ok(rx)
    }

    async fn publish(&self, queue: &str, publication: Publication) -> Result<(), TransportError> {
        let properties = BasicProperties::default()
            .with_content_type(publication.content_type.into())
            .with_correlation_id(publication.correlation_id.into())
            .with_reply_to(publication.reply_to.into());
        let _confirm = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &publication.body,
                properties,
            )
            .await
            .map_err(|e| {
                debug!(queue, error = %e, "publish failed");
                TransportError::Shutdown
            })?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.channel.close(200, "done").await {
            debug!(error = %e, "channel close failed");
        }
    }
}
