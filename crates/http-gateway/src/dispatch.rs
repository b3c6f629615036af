//! Dispatch core shared by every ingestion mode.
//!
//! Takes one canonical call, runs the local gates (ingest errors, method
//! name hygiene, signature outcome), invokes the transport, and shapes the
//! HTTP response.

use crate::error::DispatchError;
use crate::service::AppState;
use crate::sign::SignatureError;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use queue_rpc::{CallMode, SIGNED_SUFFIX};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{info, warn};

/// How the backend reply is rendered to the HTTP caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Raw reply bytes as `application/json`.
    Json,
    /// Reply parsed as `{Body, ContentType}` and relayed verbatim, for
    /// payment-provider callback formats.
    Passthrough,
}

/// One normalized call, built fresh per HTTP request.
pub struct CanonicalCall {
    pub module: String,
    pub version: String,
    pub method: String,
    pub biz_content: Map<String, Value>,
    pub callback: Option<String>,
    /// `None` for unsigned requests; the verifier's outcome otherwise.
    pub sign_result: Option<Result<(), SignatureError>>,
}

/// Passthrough reply shape expected from Body/Form/URL-mode backends.
#[derive(Debug, Default, Deserialize)]
struct BodyReply {
    #[serde(rename = "Body", default)]
    body: String,
    #[serde(rename = "ContentType", default)]
    content_type: String,
}

/// Run one call end to end and write the response.
pub async fn call_api(
    state: &AppState,
    ingest_error: Option<String>,
    call: CanonicalCall,
    shape: ResponseShape,
) -> Response {
    let start = Instant::now();
    let payload = serde_json::to_vec(&call.biz_content);
    let outcome = match &payload {
        Ok(bytes) => run(state, ingest_error, &call, bytes).await,
        Err(e) => Err(DispatchError::Ingest(e.to_string())),
    };

    let elapsed = start.elapsed();
    let payload_text = payload
        .as_deref()
        .map(String::from_utf8_lossy)
        .unwrap_or_default();
    match &outcome {
        Ok(reply) if state.verbose => info!(
            ?elapsed,
            module = %call.module,
            method = %call.method,
            version = %call.version,
            payload = %payload_text,
            reply = %String::from_utf8_lossy(reply),
            "call dispatched"
        ),
        Ok(_) => info!(
            ?elapsed,
            module = %call.module,
            method = %call.method,
            version = %call.version,
            payload = %payload_text,
            "call dispatched"
        ),
        Err(e) => info!(
            ?elapsed,
            module = %call.module,
            method = %call.method,
            version = %call.version,
            payload = %payload_text,
            error = %e,
            "call failed"
        ),
    }

    match outcome {
        Ok(reply) => shape_success(shape, reply, call.callback.as_deref()),
        Err(e) => shape_error(&e, call.callback.as_deref()),
    }
}

async fn run(
    state: &AppState,
    ingest_error: Option<String>,
    call: &CanonicalCall,
    payload: &[u8],
) -> Result<Vec<u8>, DispatchError> {
    if let Some(message) = ingest_error {
        return Err(DispatchError::Ingest(message));
    }

    // The signing suffix is a wire convention, never a caller-visible name.
    if call.method.ends_with(SIGNED_SUFFIX) {
        return Err(DispatchError::ReservedSuffix(call.method.clone()));
    }

    let mode = match &call.sign_result {
        None => CallMode::Unsigned,
        Some(Ok(())) => CallMode::Signed,
        Some(Err(e)) => return Err(DispatchError::Signature(e.clone())),
    };

    let queue = format!("{}_{}", call.module, call.version);
    match state.client.call(&queue, &call.method, mode, payload).await {
        Ok(reply) => Ok(reply),
        Err(e) => {
            let message = e.to_string().replace(SIGNED_SUFFIX, "");
            // Payload-shape mismatches point at a client/backend contract
            // drift worth surfacing to operators.
            if message.contains("cannot unmarshal") || message.contains("invalid type") {
                warn!(
                    module = %call.module,
                    method = %call.method,
                    version = %call.version,
                    error = %message,
                    "backend rejected payload shape"
                );
            }
            Err(DispatchError::Transport(message))
        }
    }
}

fn shape_success(shape: ResponseShape, reply: Vec<u8>, callback: Option<&str>) -> Response {
    match shape {
        ResponseShape::Json => respond("application/json; charset=UTF-8", reply, callback),
        ResponseShape::Passthrough => {
            let parsed = serde_json::from_slice::<BodyReply>(&reply).unwrap_or_else(|e| {
                warn!(error = %e, "passthrough reply was not {{Body, ContentType}}");
                BodyReply::default()
            });
            let content_type = if parsed.content_type.is_empty() {
                "text/plain"
            } else {
                &parsed.content_type
            };
            respond(
                &format!("{content_type}; charset=UTF-8"),
                parsed.body.into_bytes(),
                callback,
            )
        }
    }
}

fn shape_error(error: &DispatchError, callback: Option<&str>) -> Response {
    let body = serde_json::to_string_pretty(&error.envelope()).unwrap_or_default();
    respond("application/json; charset=UTF-8", body.into_bytes(), callback)
}

fn respond(content_type: &str, body: Vec<u8>, callback: Option<&str>) -> Response {
    let body = match callback {
        Some(name) if !name.is_empty() => {
            let mut wrapped = Vec::with_capacity(name.len() + body.len() + 2);
            wrapped.extend_from_slice(name.as_bytes());
            wrapped.push(b'(');
            wrapped.extend_from_slice(&body);
            wrapped.push(b')');
            wrapped
        }
        _ => body,
    };
    ([(header::CONTENT_TYPE, content_type.to_string())], body).into_response()
}
