//! Platform integration adapters for the Stockrelay daemon.
//!
//! The dispatcher talks to commerce platforms through the
//! [`IntegrationAdapter`] trait. An adapter owns the wire format and
//! classifies everything that can happen during a push into the closed
//! [`PushOutcome`] set; retry policy stays in the dispatcher.

mod adapter;
mod error;
mod http;

pub use adapter::{IntegrationAdapter, PushOutcome};
pub use error::{AdapterError, AdapterResult};
pub use http::{AdapterConfig, HttpIntegrationAdapter};
