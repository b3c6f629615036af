//! Per-destination-queue sub-client.
//!
//! A [`QueueClient`] owns one broker channel and one exclusive reply queue
//! for a single destination queue. In-flight calls are tracked in a pending
//! table keyed by a monotonically increasing sequence number; the reply
//! reader task resolves each entry exactly once, either with the correlated
//! reply or with the shutdown condition when the channel dies.

use crate::broker::{BrokerChannel, Delivery, Publication};
use crate::client::CallMode;
use crate::error::TransportError;
use crate::frame::{self, ResponseFrame};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Idle ceiling for the reply reader. A reply queue that sees no traffic
/// for this long is assumed abandoned and recycled. This is a liveness
/// safety valve, not the per-call timeout (that is enforced one layer up).
pub(crate) const IDLE_CEILING: Duration = Duration::from_secs(3600);

struct PendingCall {
    method: String,
    tx: oneshot::Sender<Result<Vec<u8>, TransportError>>,
}

/// Sub-client for one destination queue.
pub(crate) struct QueueClient {
    queue: String,
    reply_queue: String,
    channel: Arc<dyn BrokerChannel>,
    seq: AtomicU64,
    pending: Arc<DashMap<u64, PendingCall>>,
    alive: Arc<AtomicBool>,
}

impl QueueClient {
    /// Wrap an already-prepared channel and consumption stream, and spawn
    /// the reply reader task.
    pub(crate) fn start(
        queue: String,
        reply_queue: String,
        channel: Arc<dyn BrokerChannel>,
        deliveries: mpsc::Receiver<Delivery>,
    ) -> Arc<Self> {
        let client = Arc::new(Self {
            queue,
            reply_queue,
            channel: Arc::clone(&channel),
            seq: AtomicU64::new(0),
            pending: Arc::new(DashMap::new()),
            alive: Arc::new(AtomicBool::new(true)),
        });

        tokio::spawn(read_replies(
            client.queue.clone(),
            deliveries,
            Arc::clone(&client.pending),
            Arc::clone(&client.alive),
            channel,
        ));

        client
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Publish one request and await its correlated reply.
    ///
    /// The caller enforces the per-call timeout by dropping the returned
    /// future; the pending entry then lingers until the late reply arrives
    /// (discarded into the closed oneshot) or the sub-client is torn down.
    pub(crate) async fn call(
        &self,
        method: &str,
        mode: CallMode,
        params: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Shutdown);
        }

        let wire_method = mode.wire_method(method);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            seq,
            PendingCall {
                method: wire_method.clone(),
                tx,
            },
        );

        let body = match frame::encode_request(&wire_method, params) {
            Ok(body) => body,
            Err(e) => {
                self.pending.remove(&seq);
                return Err(e);
            }
        };

        let publication = Publication::json(seq.to_string(), self.reply_queue.clone(), body);
        if let Err(e) = self.channel.publish(&self.queue, publication).await {
            self.pending.remove(&seq);
            self.alive.store(false, Ordering::Release);
            // Ending the delivery stream wakes the reader for teardown now,
            // not at the idle ceiling.
            self.channel.close().await;
            debug!(queue = %self.queue, seq, error = %e, "publish failed, sub-client shut down");
            return Err(TransportError::Shutdown);
        }

        debug!(queue = %self.queue, seq, method = %wire_method, "request published");

        match rx.await {
            Ok(result) => result,
            // Reader task tore the pending table down without resolving us.
            Err(_) => Err(TransportError::Shutdown),
        }
    }
}

/// Reply reader loop. Resolves pending calls by correlation id; tears the
/// sub-client down on stream end or after the idle ceiling.
async fn read_replies(
    queue: String,
    mut deliveries: mpsc::Receiver<Delivery>,
    pending: Arc<DashMap<u64, PendingCall>>,
    alive: Arc<AtomicBool>,
    channel: Arc<dyn BrokerChannel>,
) {
    loop {
        match tokio::time::timeout(IDLE_CEILING, deliveries.recv()).await {
            Ok(Some(delivery)) => resolve(&queue, &pending, delivery),
            Ok(None) => {
                debug!(queue = %queue, "reply stream ended, sub-client shut down");
                break;
            }
            Err(_) => {
                debug!(queue = %queue, "idle ceiling reached, recycling reply queue");
                break;
            }
        }
    }

    alive.store(false, Ordering::Release);
    // Codec closure: every still-pending sequence resolves exactly once.
    let seqs: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
    for seq in seqs {
        if let Some((_, call)) = pending.remove(&seq) {
            let _ = call.tx.send(Err(TransportError::Shutdown));
        }
    }
    channel.close().await;
}

fn resolve(queue: &str, pending: &DashMap<u64, PendingCall>, delivery: Delivery) {
    let seq: u64 = match delivery.correlation_id.parse() {
        Ok(seq) => seq,
        Err(_) => {
            warn!(queue = %queue, correlation_id = %delivery.correlation_id,
                "reply with unparseable correlation id discarded");
            return;
        }
    };

    let Some((_, call)) = pending.remove(&seq) else {
        // Late reply for an abandoned call.
        debug!(queue = %queue, seq, "reply for unknown sequence discarded");
        return;
    };

    let result = match serde_json::from_slice::<ResponseFrame>(&delivery.body) {
        Ok(frame) => frame.into_result(),
        Err(e) => Err(TransportError::Codec(e)),
    };

    if call.tx.send(result).is_err() {
        debug!(queue = %queue, seq, method = %call.method, "caller gone before reply");
    }
}
