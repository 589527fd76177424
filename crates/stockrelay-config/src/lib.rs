//! Core types, configuration, and utilities for the Stockrelay daemon.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, DispatcherSettings, DEFAULT_LOG_LEVEL, DEFAULT_PLATFORM_API_URL};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
