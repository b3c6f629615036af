//! # HTTP Gateway - Web Frontend for Queue-RPC Backends
//!
//! Normalizes four HTTP calling conventions into one canonical
//! `(module, version, method, bizContent)` call, optionally verifies a
//! replay-resistant request signature, invokes the backend over
//! [`queue_rpc`], and shapes the reply back into HTTP (JSON, JSONP, or
//! passthrough body/content-type for payment-style callbacks).
//!
//! ## Ingestion modes
//!
//! | Mode    | Path                  | Payload source                         | Shaping     |
//! |---------|-----------------------|----------------------------------------|-------------|
//! | Default | `/gateway`            | `module,version,method,bizContent` fields, optional `sign` | JSON |
//! | Body    | `/gateway/b/<pairs>`  | raw body as `bizContent.Body`          | passthrough |
//! | Form    | `/gateway/f/<pairs>`  | form fields as `bizContent` keys       | passthrough |
//! | Raw     | `/gateway/r/<pairs>`  | raw JSON body as `bizContent`          | JSON        |
//! | URL     | `/gateway/u/<pairs>`  | `b` path pair as `bizContent`          | passthrough |

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod path;
pub mod routes;
pub mod service;
pub mod sign;

pub use config::{ConfigError, GatewayConfig};
pub use dispatch::{CanonicalCall, ResponseShape};
pub use error::{DispatchError, ErrorEnvelope, GatewayError};
pub use path::PathCall;
pub use service::{AppState, GatewayService};
pub use sign::SignatureError;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
