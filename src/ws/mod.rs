//! Real-time delivery: the hub, its connections, and the envelopes they move.

pub(crate) mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod registry;
pub mod service;
pub mod types;
pub mod upgrade;
