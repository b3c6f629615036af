//! # Queue-RPC - Request/Reply Transport over Broker Queues
//!
//! A JSON-RPC-style client transport multiplexed over message-broker queues.
//! Each backend service listens on one destination queue; the client
//! publishes request frames there and receives correlated replies on a
//! private, exclusively-declared reply queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        RpcClient                           │
//! │  queue name → QueueClient cache (one per destination)      │
//! │  per-call timeout, single shutdown retry                   │
//! └──────────────┬─────────────────────────────────────────────┘
//!                │
//! ┌──────────────┴─────────────────────────────────────────────┐
//! │                       QueueClient                          │
//! │  one channel, one exclusive reply queue, pending table     │
//! │  seq → oneshot (correlation by sequence number)            │
//! └──────────────┬─────────────────────────────────────────────┘
//!                │
//!         Broker trait (publish / consume / declare)
//!                │
//!     ┌──────────┴──────────┐
//!     ▼                     ▼
//! AmqpBroker          MemoryBroker
//! (production)        (tests, embedded fakes)
//! ```
//!
//! Correlation is by sequence number, not by queue: one reply queue per
//! destination safely serves many concurrent in-flight calls because the
//! broker may deliver replies out of order relative to request order. The
//! pending table is the sole mechanism restoring per-call identity.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod amqp;
pub mod broker;
pub mod client;
pub mod error;
pub mod frame;
pub mod memory;
mod subclient;

pub use amqp::AmqpBroker;
pub use broker::{Broker, BrokerChannel, Delivery, Publication};
pub use client::{CallMode, RpcClient, SIGNED_SUFFIX};
pub use error::TransportError;
pub use frame::{RequestFrame, ResponseFrame};
pub use memory::MemoryBroker;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
