//! Configuration for the replay API and the expiry sweeper.
//!
//! All configuration is loaded from environment variables once at startup.
//! Secrets (the API key and the table connection string) are never logged.

use std::fmt;
use std::time::Duration;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5050;

/// Default request body limit (10 KiB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024;

/// Default sweep interval (once a day)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 24 * 3600;

/// Server configuration
#[derive(Clone)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,

    /// Server port
    pub port: u16,

    /// Shared secret expected in the `apikey` header
    pub api_key: Option<String>,

    /// Per-request timeout (default: 5 seconds)
    pub request_timeout: Duration,

    /// Maximum request body size in bytes (default: 10KB)
    pub max_body_size: usize,

    /// Maximum number of stored replays (default: unlimited)
    pub max_replays: Option<usize>,

    /// Forward raw storage error text in error responses (default: true)
    pub expose_error_details: bool,

    /// Expiry sweeper settings, present when a table connection string is set
    pub sweeper: Option<SweeperConfig>,
}

/// Expiry sweeper configuration
#[derive(Clone)]
pub struct SweeperConfig {
    /// Table storage connection string
    pub connection_string: String,

    /// Name of the table to sweep
    pub table_name: String,

    /// Time between sweeps
    pub interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),

            api_key: std::env::var("APIKEY").ok().filter(|k| !k.is_empty()),

            request_timeout: Duration::from_millis(
                std::env::var("REQUEST_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5000),
            ),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_BODY_SIZE),
            max_replays: std::env::var("MAX_REPLAYS")
                .ok()
                .and_then(|s| s.parse().ok()),
            expose_error_details: std::env::var("EXPOSE_ERROR_DETAILS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),

            sweeper: SweeperConfig::from_env(),
        }
    }

    /// Check if an API key is configured
    pub fn api_key_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

impl SweeperConfig {
    /// Load sweeper settings, or `None` when no connection string is set
    pub fn from_env() -> Option<Self> {
        let connection_string = std::env::var("TABLE_CONNECTION_STRING")
            .ok()
            .filter(|s| !s.is_empty())?;

        Some(Self {
            connection_string,
            table_name: std::env::var("TABLE_NAME").unwrap_or_else(|_| "items".to_string()),
            interval: Duration::from_secs(
                std::env::var("SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
            ),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("port", &self.port)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("max_body_size", &self.max_body_size)
            .field("max_replays", &self.max_replays)
            .field("expose_error_details", &self.expose_error_details)
            .field("sweeper", &self.sweeper)
            .finish()
    }
}

impl fmt::Debug for SweeperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SweeperConfig")
            .field("connection_string", &"<redacted>")
            .field("table_name", &self.table_name)
            .field("interval", &self.interval)
            .finish()
    }
}
