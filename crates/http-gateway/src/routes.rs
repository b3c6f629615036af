//! HTTP routes: the default mode plus the four path-prefixed modes.
//!
//! Each handler normalizes its calling convention into a
//! [`CanonicalCall`] and hands off to the shared dispatch core.

use crate::dispatch::{call_api, CanonicalCall, ResponseShape};
use crate::path;
use crate::service::AppState;
use crate::sign;
use axum::body::{Body, Bytes};
use axum::extract::connect_info::ConnectInfo;
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::request::Parts;
use axum::http::{header, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::warn;

/// In-memory cap on inbound bodies, shared with the multipart reader.
const MAX_BODY_BYTES: usize = 32 << 20;

pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/gateway", any(gateway_default))
        .route("/gateway/", any(gateway_default))
        .route("/gateway/b/*pairs", any(gateway_body))
        .route("/gateway/f/*pairs", any(gateway_form))
        .route("/gateway/r/*pairs", any(gateway_raw))
        .route("/gateway/u/*pairs", any(gateway_url))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Default mode: everything in query/form fields, optional signature.
async fn gateway_default(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let client_ip = client_ip(&parts);
    let query = parse_query(&parts);
    let (params, ingest_error) = collect_params(&parts, body, &query).await;

    let get = |key: &str| {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    };
    let module = get("module");
    let version = get("version");
    let method = get("method");
    let sign = get("sign");
    let callback = get("callback");

    let (biz_content, parse_error) = parse_biz_content(&get("bizContent"), client_ip);
    let ingest_error = ingest_error.or(parse_error);

    // POST requests sign the merged form set; everything else the query.
    let sign_result = (!sign.is_empty()).then(|| {
        let signed = if parts.method == Method::POST {
            &params
        } else {
            &query
        };
        sign::verify(signed, &state.sign_key)
    });

    let call = CanonicalCall {
        module,
        version,
        method,
        biz_content,
        callback: (!callback.is_empty()).then_some(callback),
        sign_result,
    };
    call_api(&state, ingest_error, call, ResponseShape::Json).await
}

/// Body mode: the raw body becomes `bizContent.Body`. Payment-provider
/// POST callbacks (XML and friends) arrive here.
async fn gateway_body(
    State(state): State<AppState>,
    Path(pairs): Path<String>,
    request: Request,
) -> Response {
    let decoded = path::parse(&pairs);
    let (parts, body) = request.into_parts();
    let client_ip = client_ip(&parts);

    let body = read_body(body).await.unwrap_or_else(|e| {
        warn!(error = %e, "request body read failed");
        Bytes::new()
    });

    let mut biz_content = Map::new();
    biz_content.insert(
        "Body".to_string(),
        Value::String(String::from_utf8_lossy(&body).into_owned()),
    );
    biz_content.insert("ClientIP".to_string(), Value::String(client_ip));

    let call = canonical(decoded, biz_content);
    call_api(&state, None, call, ResponseShape::Passthrough).await
}

/// Form mode: form fields become `bizContent` keys.
async fn gateway_form(
    State(state): State<AppState>,
    Path(pairs): Path<String>,
    request: Request,
) -> Response {
    let decoded = path::parse(&pairs);
    let (parts, body) = request.into_parts();
    let client_ip = client_ip(&parts);
    let query = parse_query(&parts);
    let (params, ingest_error) = collect_params(&parts, body, &query).await;

    let mut biz_content = Map::new();
    for (key, value) in params {
        // First value wins for repeated fields.
        biz_content
            .entry(key)
            .or_insert_with(|| Value::String(value));
    }
    biz_content.insert("ClientIP".to_string(), Value::String(client_ip));

    let call = canonical(decoded, biz_content);
    call_api(&state, ingest_error, call, ResponseShape::Passthrough).await
}

/// Raw mode: the body is a JSON object, used as `bizContent` directly.
async fn gateway_raw(
    State(state): State<AppState>,
    Path(pairs): Path<String>,
    request: Request,
) -> Response {
    let decoded = path::parse(&pairs);
    let (parts, body) = request.into_parts();
    let client_ip = client_ip(&parts);

    let body = read_body(body).await.unwrap_or_else(|e| {
        warn!(error = %e, "request body read failed");
        Bytes::new()
    });
    let (biz_content, ingest_error) =
        parse_biz_content(&String::from_utf8_lossy(&body), client_ip);

    let call = canonical(decoded, biz_content);
    call_api(&state, ingest_error, call, ResponseShape::Json).await
}

/// URL mode: the payload travels in the `b` path pair.
async fn gateway_url(
    State(state): State<AppState>,
    Path(pairs): Path<String>,
    request: Request,
) -> Response {
    let decoded = path::parse(&pairs);
    let (parts, _body) = request.into_parts();
    let client_ip = client_ip(&parts);

    let raw = decoded.biz_content.clone().unwrap_or_default();
    let (biz_content, ingest_error) = parse_biz_content(&raw, client_ip);

    let call = canonical(decoded, biz_content);
    call_api(&state, ingest_error, call, ResponseShape::Passthrough).await
}

async fn health() -> Response {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "mq-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

fn canonical(decoded: path::PathCall, biz_content: Map<String, Value>) -> CanonicalCall {
    CanonicalCall {
        module: decoded.module,
        version: decoded.version,
        method: decoded.method,
        biz_content,
        callback: decoded.callback,
        sign_result: None,
    }
}

/// Parse a `bizContent` JSON object string and inject `ClientIP`.
///
/// A parse failure still yields a usable (empty) map, with the error
/// reported separately so the dispatch core can short-circuit.
fn parse_biz_content(raw: &str, client_ip: String) -> (Map<String, Value>, Option<String>) {
    let (mut map, error) = match serde_json::from_str::<Map<String, Value>>(raw) {
        Ok(map) => (map, None),
        Err(e) => (Map::new(), Some(e.to_string())),
    };
    map.insert("ClientIP".to_string(), Value::String(client_ip));
    (map, error)
}

/// Resolve the caller's address: proxy headers first, then the peer.
fn client_ip(parts: &Parts) -> String {
    if let Some(ip) = header_value(parts, "x-real-ip") {
        return ip;
    }
    if let Some(forwarded) = header_value(parts, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            return first.trim().to_string();
        }
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn parse_query(parts: &Parts) -> Vec<(String, String)> {
    form_urlencoded::parse(parts.uri.query().unwrap_or_default().as_bytes())
        .into_owned()
        .collect()
}

/// Gather request parameters: body form fields (urlencoded or multipart)
/// first, then query pairs. Lookups take the first occurrence.
async fn collect_params(
    parts: &Parts,
    body: Body,
    query: &[(String, String)],
) -> (Vec<(String, String)>, Option<String>) {
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let mut params = Vec::new();
    let mut error = None;

    if content_type.starts_with("multipart/form-data") {
        match read_multipart(parts, body).await {
            Ok(fields) => params.extend(fields),
            Err(e) => error = Some(e),
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        match read_body(body).await {
            Ok(bytes) => {
                params.extend(form_urlencoded::parse(&bytes).into_owned());
            }
            Err(e) => error = Some(e),
        }
    }

    params.extend_from_slice(query);
    (params, error)
}

async fn read_multipart(parts: &Parts, body: Body) -> Result<Vec<(String, String)>, String> {
    let request = Request::from_parts(parts.clone(), body);
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| e.to_string())?;

    let mut fields = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        // File parts are not form parameters.
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(|n| n.to_string()) else {
            continue;
        };
        let value = field.text().await.map_err(|e| e.to_string())?;
        fields.push((name, value));
    }
    Ok(fields)
}

async fn read_body(body: Body) -> Result<Bytes, String> {
    axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| e.to_string())
}
