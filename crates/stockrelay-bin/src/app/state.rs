//! Daemon state definition.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use stockrelay_config::Config;
use stockrelay_database::MovementStore;

/// Shared daemon state (thread-safe).
#[derive(Clone)]
pub struct DaemonState {
    pub config: Arc<Config>,
    /// Movement queue plus the unmapped-SKU registry.
    pub store: MovementStore,
    /// When this daemon process came up.
    pub started_at: DateTime<Utc>,
}
