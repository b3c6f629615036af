//! In-memory broker for tests and embedded use.
//!
//! Implements the full [`Broker`]/[`BrokerChannel`] surface without a
//! broker process. Backends are registered as closures with [`serve`];
//! fault knobs make failure paths reachable from tests.
//!
//! [`serve`]: MemoryBroker::serve

use crate::broker::{Broker, BrokerChannel, Delivery, Publication};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Handler = Arc<dyn Fn(Vec<u8>) -> Option<Vec<u8>> + Send + Sync>;

#[derive(Default)]
struct MemoryState {
    backends: Mutex<HashMap<String, Handler>>,
    reply_senders: Mutex<HashMap<String, mpsc::Sender<Delivery>>>,
    // Receivers parked between declare and consume.
    parked_receivers: Mutex<HashMap<String, mpsc::Receiver<Delivery>>>,
    // Every reply queue ever declared, for test assertions.
    declared_log: Mutex<Vec<String>>,
    fail_publishes: AtomicUsize,
    fail_channel_opens: AtomicUsize,
}

/// In-memory [`Broker`].
#[derive(Default)]
pub struct MemoryBroker {
    state: Arc<MemoryState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend on a destination queue.
    ///
    /// The handler receives each raw request frame and returns the raw
    /// reply frame, or `None` to swallow the request.
    pub fn serve<F>(&self, queue: &str, handler: F)
    where
        F: Fn(Vec<u8>) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.state
            .backends
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(queue.to_string(), Arc::new(handler));
    }

    /// Make the next `n` publishes fail.
    pub fn fail_next_publishes(&self, n: usize) {
        self.state.fail_publishes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` channel opens fail. A reconnect clears this.
    pub fn fail_next_channel_opens(&self, n: usize) {
        self.state.fail_channel_opens.store(n, Ordering::SeqCst);
    }

    /// How many reply queues were ever declared for a destination queue.
    pub fn reply_queue_count(&self, queue: &str) -> usize {
        let needle = format!(".{queue}.");
        self.state
            .declared_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|name| name.contains(&needle))
            .count()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError> {
        let fails = &self.state.fail_channel_opens;
        if fails
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::OpenChannel);
        }
        Ok(Box::new(MemoryChannel {
            state: Arc::clone(&self.state),
            declared: Mutex::new(Vec::new()),
        }))
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        self.state.fail_channel_opens.store(0, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryChannel {
    state: Arc<MemoryState>,
    declared: Mutex<Vec<String>>,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn consumer_count(&self, queue: &str) -> Result<Option<u32>, TransportError> {
        let backends = self
            .state
            .backends
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Ok(Some(u32::from(backends.contains_key(queue))))
    }

    async fn declare_reply_queue(&self, name: &str) -> Result<(), TransportError> {
        let (tx, rx) = mpsc::channel(64);
        self.state
            .reply_senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), tx);
        self.state
            .parked_receivers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), rx);
        self.state
            .declared_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(name.to_string());
        self.declared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(name.to_string());
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>, TransportError> {
        self.state
            .parked_receivers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(queue)
            .ok_or(TransportError::RegisterConsumer)
    }

    async fn publish(&self, queue: &str, publication: Publication) -> Result<(), TransportError> {
        let fails = &self.state.fail_publishes;
        if fails
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Shutdown);
        }

        let handler = {
            let backends = self
                .state
                .backends
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            backends.get(queue).cloned()
        };
        // No consumer: the message is dropped, exactly like a real broker
        // routing to a queue nobody reads in time.
        let Some(handler) = handler else { return Ok(()) };

        let reply_tx = {
            let senders = self
                .state
                .reply_senders
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            senders.get(&publication.reply_to).cloned()
        };

        tokio::spawn(async move {
            if let Some(body) = handler(publication.body) {
                if let Some(tx) = reply_tx {
                    let _ = tx
                        .send(Delivery {
                            correlation_id: publication.correlation_id,
                            body,
                        })
                        .await;
                }
            }
        });
        Ok(())
    }

    async fn close(&self) {
        let declared: Vec<String> = self
            .declared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        let mut senders = self
            .state
            .reply_senders
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for name in declared {
            senders.remove(&name);
        }
    }
}
