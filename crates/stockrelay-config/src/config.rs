//! Configuration management for the daemon.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default platform API base URL (can be overridden at compile time via
/// STOCKRELAY_PLATFORM_API_URL).
pub const DEFAULT_PLATFORM_API_URL: &str = match option_env!("STOCKRELAY_PLATFORM_API_URL") {
    Some(url) => url,
    None => "https://api.tiendanube.com/v1",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Commerce platform API base URL.
    #[serde(default = "default_platform_api_url")]
    pub platform_api_url: String,
    /// Access token for the platform API (optional until the store is linked).
    #[serde(default)]
    pub platform_access_token: Option<String>,
    /// Dispatcher tuning.
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
}

/// Tuning knobs for the movement dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Maximum movements claimed per store per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Poll interval between dispatch cycles, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Claim lease duration, in seconds. Movements stuck in `processing`
    /// longer than this are treated as abandoned and reclaimed.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Upper bound on a single adapter push, in seconds.
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,
    /// Default attempt budget stamped on new movements.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// First retry delay, in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Retry delay cap, in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_platform_api_url() -> String {
    DEFAULT_PLATFORM_API_URL.to_string()
}

fn default_batch_size() -> usize {
    25
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_lease_secs() -> u64 {
    120
}

fn default_adapter_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> i32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    30_000
}

fn default_backoff_max_ms() -> u64 {
    3_600_000
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_secs: default_lease_secs(),
            adapter_timeout_secs: default_adapter_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            platform_api_url: default_platform_api_url(),
            platform_access_token: None,
            dispatcher: DispatcherSettings::default(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let config_path = paths.config_file();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("STOCKRELAY_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(url) = std::env::var("STOCKRELAY_PLATFORM_API_URL") {
            self.platform_api_url = url;
        }
        if let Ok(token) = std::env::var("STOCKRELAY_PLATFORM_TOKEN") {
            self.platform_access_token = Some(token);
        }
    }

    /// Get the platform API URL as a parsed URL.
    pub fn platform_api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.platform_api_url).map_err(CoreError::from)
    }
}
