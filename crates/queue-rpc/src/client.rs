//! Transport client: sub-client cache, per-call timeout, shutdown retry.

use crate::broker::Broker;
use crate::error::TransportError;
use crate::subclient::QueueClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Method suffix a backend requires on signature-verified calls.
pub const SIGNED_SUFFIX: &str = "WithSign";

/// How a call addresses the backend method.
///
/// The suffix convention is applied at the wire boundary only; callers and
/// dispatch tables work with the clean method name throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Invoke the method as named.
    Unsigned,
    /// Invoke the signature-verified variant of the method.
    Signed,
}

impl CallMode {
    /// The method name actually placed on the wire.
    pub fn wire_method(self, method: &str) -> String {
        match self {
            CallMode::Unsigned => method.to_string(),
            CallMode::Signed => format!("{method}{SIGNED_SUFFIX}"),
        }
    }
}

/// Queue RPC client.
///
/// Cheap to clone via [`Arc`]; one instance serves the whole process.
/// Sub-clients are created lazily per destination queue and cached until
/// their channel dies, at which point the next call replaces them.
pub struct RpcClient {
    broker: Arc<dyn Broker>,
    process_name: String,
    timeout: Duration,
    timeout_secs: u64,
    clients: Mutex<HashMap<String, Arc<QueueClient>>>,
}

impl RpcClient {
    /// Create a client over the given broker.
    ///
    /// `process_name` prefixes reply queue names so operators can attribute
    /// them; `timeout` bounds every call end to end.
    pub fn new(broker: Arc<dyn Broker>, process_name: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            broker,
            process_name: process_name.into(),
            timeout: Duration::from_secs(timeout_secs),
            timeout_secs,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Call `method` on the backend behind `queue` and return its raw
    /// result bytes.
    ///
    /// A call that fails with the shutdown condition is retried exactly
    /// once against a freshly created sub-client; every other error is
    /// final. The whole operation, retry included, is bounded by the
    /// configured timeout.
    pub async fn call(
        &self,
        queue: &str,
        method: &str,
        mode: CallMode,
        params: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        match tokio::time::timeout(self.timeout, self.call_inner(queue, method, mode, params))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(queue, method, timeout_secs = self.timeout_secs, "call timed out");
                Err(TransportError::Timeout(self.timeout_secs))
            }
        }
    }

    async fn call_inner(
        &self,
        queue: &str,
        method: &str,
        mode: CallMode,
        params: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        let mut retried = false;
        loop {
            let client = self.queue_client(queue).await?;
            match client.call(method, mode, params).await {
                Err(e) if e.is_shutdown() && !retried => {
                    retried = true;
                    self.evict(queue, &client).await;
                    debug!(queue, method, "sub-client shut down, retrying once");
                }
                other => return other,
            }
        }
    }

    /// Fetch or create the sub-client for a destination queue.
    async fn queue_client(&self, queue: &str) -> Result<Arc<QueueClient>, TransportError> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(queue) {
            if client.is_alive() {
                return Ok(Arc::clone(client));
            }
            clients.remove(queue);
        }

        // Channel open gets one whole-connection reconnect before giving up.
        let channel = match self.broker.channel().await {
            Ok(channel) => channel,
            Err(_) => {
                info!(queue, "channel open failed, reconnecting to broker");
                self.broker.reconnect().await?;
                self.broker
                    .channel()
                    .await
                    .map_err(|_| TransportError::OpenChannel)?
            }
        };

        // A queue nobody consumes means the backend is absent; fail fast
        // rather than letting the request rot until the timeout.
        if let Some(0) = channel.consumer_count(queue).await? {
            channel.close().await;
            return Err(TransportError::NoSuchService(queue.to_string()));
        }

        let reply_queue = format!("{}.{}.{}", self.process_name, queue, Uuid::new_v4());
        channel.declare_reply_queue(&reply_queue).await?;
        let deliveries = channel.consume(&reply_queue).await?;

        info!(queue, reply_queue = %reply_queue, "sub-client created");
        let client = QueueClient::start(
            queue.to_string(),
            reply_queue,
            Arc::from(channel),
            deliveries,
        );
        clients.insert(queue.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Drop a dead sub-client from the cache, unless a concurrent caller
    /// already replaced it.
    async fn evict(&self, queue: &str, dead: &Arc<QueueClient>) {
        let mut clients = self.clients.lock().await;
        if let Some(current) = clients.get(queue) {
            if Arc::ptr_eq(current, dead) {
                clients.remove(queue);
            }
        }
    }
}

/// Best-effort name of the running executable, for reply queue prefixes.
pub fn process_name() -> String {
    std::env::args()
        .next()
        .as_deref()
        .and_then(|arg| {
            std::path::Path::new(arg)
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| "queue-rpc".to_string())
}
