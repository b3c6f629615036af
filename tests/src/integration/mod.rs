//! End-to-end properties over the in-memory broker.

pub mod gateway;
pub mod transport;
