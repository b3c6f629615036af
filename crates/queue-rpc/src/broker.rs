//! Broker capability interface.
//!
//! The correlation, timeout, and retry logic in this crate never touches a
//! broker client library directly. It is written against these narrow
//! traits, so it runs identically over a real AMQP connection
//! ([`crate::AmqpBroker`]) and an in-memory fake ([`crate::MemoryBroker`]).

use crate::error::TransportError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A message received from a consumed queue.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Correlation id echoed back by the backend (decimal sequence number).
    pub correlation_id: String,
    /// Raw frame bytes.
    pub body: Vec<u8>,
}

/// A message to publish to a destination queue.
#[derive(Debug, Clone)]
pub struct Publication {
    /// Correlation id for the reply (decimal sequence number).
    pub correlation_id: String,
    /// Private reply queue the backend should answer to.
    pub reply_to: String,
    /// Declared content type of `body`.
    pub content_type: String,
    /// Raw frame bytes.
    pub body: Vec<u8>,
}

impl Publication {
    /// A JSON publication, the only content type this transport emits.
    pub fn json(correlation_id: String, reply_to: String, body: Vec<u8>) -> Self {
        Self {
            correlation_id,
            reply_to,
            content_type: "application/json".to_string(),
            body,
        }
    }
}

/// Shared broker connection.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a channel on the shared connection.
    async fn channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError>;

    /// Replace the shared connection wholesale. Coarse-grained and rare;
    /// serialized by the caller's sub-client creation lock.
    async fn reconnect(&self) -> Result<(), TransportError>;
}

/// One broker channel, owned by a single sub-client.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Best-effort probe of the consumer count on a destination queue.
    ///
    /// `Ok(Some(0))` is the authoritative "no backend present" signal.
    /// `Ok(None)` means the probe was inconclusive, which is not fatal.
    async fn consumer_count(&self, queue: &str) -> Result<Option<u32>, TransportError>;

    /// Declare a private, non-durable, auto-delete, exclusive reply queue.
    async fn declare_reply_queue(&self, name: &str) -> Result<(), TransportError>;

    /// Begin auto-acknowledged consumption on a queue.
    ///
    /// The returned stream ends when the channel dies; the sub-client
    /// treats that as the shutdown condition.
    async fn consume(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>, TransportError>;

    /// Publish one message to a destination queue.
    async fn publish(&self, queue: &str, publication: Publication) -> Result<(), TransportError>;

    /// Close the channel. Idempotent.
    async fn close(&self);
}
