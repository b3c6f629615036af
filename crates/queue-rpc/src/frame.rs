//! Wire frames for the queue RPC protocol.
//!
//! Requests are `{"Method": ..., "Params": ...}` where `Params` carries the
//! caller's own, already-serialized payload untouched. Responses are
//! `{"Result": ..., "Error": ...}` where exactly one side is meaningfully
//! populated.

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

/// Outbound request frame.
#[derive(Debug, Serialize)]
pub struct RequestFrame<'a> {
    #[serde(rename = "Method")]
    pub method: &'a str,
    #[serde(rename = "Params")]
    pub params: &'a RawValue,
}

/// Inbound response frame.
#[derive(Debug, Deserialize)]
pub struct ResponseFrame {
    #[serde(rename = "Result")]
    pub result: Option<Box<RawValue>>,
    #[serde(rename = "Error")]
    pub error: Option<Value>,
}

/// Encode a request frame. `params` must be valid JSON; it is embedded
/// verbatim, never re-interpreted.
pub fn encode_request(method: &str, params: &[u8]) -> Result<Vec<u8>, TransportError> {
    let params_json = std::str::from_utf8(params)
        .map_err(|_| TransportError::Codec(invalid_params_error()))?
        .to_owned();
    let raw = RawValue::from_string(params_json)?;
    let frame = RequestFrame {
        method,
        params: &raw,
    };
    Ok(serde_json::to_vec(&frame)?)
}

fn invalid_params_error() -> serde_json::Error {
    serde::de::Error::custom("params are not valid UTF-8")
}

impl ResponseFrame {
    /// Resolve the frame into raw result bytes or an error.
    ///
    /// An absent Result with an absent or empty Error is itself an error;
    /// a non-string Error is a protocol violation.
    pub fn into_result(self) -> Result<Vec<u8>, TransportError> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(result.get().as_bytes().to_vec()),
            (_, Some(Value::String(s))) if !s.is_empty() => Err(TransportError::Remote(s)),
            (_, Some(Value::String(_) | Value::Null)) | (None, None) => {
                Err(TransportError::Remote("unspecified error".to_string()))
            }
            (_, Some(other)) => Err(TransportError::InvalidError(other)),
        }
    }
}
