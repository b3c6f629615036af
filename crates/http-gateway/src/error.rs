//! Gateway error types and the caller-facing error envelope.

use crate::config::ConfigError;
use crate::sign::SignatureError;
use serde::Serialize;

/// JSON envelope written to HTTP callers when a call fails locally or in
/// transport. Pretty-printed on the wire.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "ErrorCode")]
    pub error_code: i64,
    #[serde(rename = "ErrorMsg")]
    pub error_msg: String,
}

/// Per-request dispatch failures, each mapped to a stable error code.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Malformed form, multipart, or payload JSON. Code 5000.
    #[error("form error: {0}")]
    Ingest(String),

    /// Caller supplied a method name carrying the internal signing suffix.
    /// Code 5001.
    #[error("invalid method name: {0}")]
    ReservedSuffix(String),

    /// Signature verification rejected the request. Code 5002.
    #[error("signature rejected: {0}")]
    Signature(#[from] SignatureError),

    /// The backend call failed; message already suffix-stripped. Code 5003.
    #[error("{0}")]
    Transport(String),
}

impl DispatchError {
    pub fn code(&self) -> i64 {
        match self {
            DispatchError::Ingest(_) => 5000,
            DispatchError::ReservedSuffix(_) => 5001,
            DispatchError::Signature(_) => 5002,
            DispatchError::Transport(_) => 5003,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error_code: self.code(),
            error_msg: self.to_string(),
        }
    }
}

/// Service-level failures (startup and serve loop).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}
