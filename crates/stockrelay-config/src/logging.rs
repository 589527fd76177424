//! Logging initialization for the daemon.

use tracing_subscriber::EnvFilter;

/// Initialize the logging system for the daemon.
///
/// Sets up tracing with:
/// - Log level from RUST_LOG env var or the provided default
/// - Structured fields rendered to stderr (foreground mode reads them live)
///
/// Safe to call more than once; only the first call installs a subscriber.
///
/// # Example
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("Daemon started");
/// ```
pub fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
