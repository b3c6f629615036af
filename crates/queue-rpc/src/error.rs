//! Transport error types.
//!
//! Message texts are part of the gateway's contract with its callers:
//! the HTTP layer forwards them verbatim inside its error envelope.

use serde_json::Value;

/// Errors surfaced by the queue RPC transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Broker connection could not be established.
    #[error("failed to connect")]
    Connect,

    /// A channel could not be opened on the shared connection,
    /// even after one whole-connection reconnect.
    #[error("failed to open a channel")]
    OpenChannel,

    /// The destination queue was confirmed to have zero consumers.
    #[error("no such service: {0}")]
    NoSuchService(String),

    /// The private reply queue could not be declared.
    #[error("failed to declare a queue")]
    DeclareQueue,

    /// Consumption on the reply queue could not be started.
    #[error("failed to register a consumer")]
    RegisterConsumer,

    /// The response frame's Error field had an unexpected shape.
    #[error("invalid error {0}")]
    InvalidError(Value),

    /// The per-call timer fired before a correlated reply arrived.
    #[error("timeout {0}s")]
    Timeout(u64),

    /// The sub-client's channel died. The transport client retries this
    /// condition exactly once against a freshly created sub-client.
    #[error("connection is shut down")]
    Shutdown,

    /// The backend reported an error in the response frame.
    #[error("{0}")]
    Remote(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether this error is the shutdown condition eligible for the
    /// single automatic retry.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, TransportError::Shutdown)
    }
}
