//! Outbound dispatcher for the Stockrelay daemon.
//!
//! This crate contains the retry policy and the background worker that
//! drains the movement queue:
//!
//! - [`backoff`]: exponential delay curve with ±20% jitter and the
//!   retry-or-give-up decision.
//! - [`Dispatcher`]: polls the store, claims due movements, pushes them
//!   through an [`stockrelay_adapter::IntegrationAdapter`], and applies the
//!   outcome (complete, schedule retry, fail, record unmapped SKU).

pub mod backoff;
mod dispatcher;

pub use backoff::{BackoffConfig, RetryDecision, JITTER_RATIO};
pub use dispatcher::{CycleStats, Dispatcher, DispatcherConfig};
