//! Configuration management for the feed client
//!
//! Loads configuration from config.toml at startup.
//! All values are configurable to avoid hardcoded constants.

use crate::feed::auth::Credentials;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Feed client configuration
///
/// Loaded from config.toml at startup. Every section falls back to its
/// defaults when absent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Hub endpoint and handshake settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Feed client behaviour
    #[serde(default)]
    pub feed: FeedConfig,

    /// Private feed credentials
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Hub endpoint and handshake configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Base for negotiate/start (https://host/signalr)
    #[serde(default = "default_http_base")]
    pub http_base: String,

    /// Base for the socket (wss://host/signalr)
    #[serde(default = "default_ws_base")]
    pub ws_base: String,

    /// The single hub this client talks to
    #[serde(default = "default_hub")]
    pub hub: String,

    /// clientProtocol sent on negotiate and start
    #[serde(default = "default_client_protocol")]
    pub client_protocol: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for negotiate/start HTTP requests
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Socket open timeout when the server does not advertise one
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Accepted for compatibility; liveness enforcement belongs to the caller.
    /// Zero disables staleness reporting.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    /// Per-phase handshake retry policy
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Exponential backoff for one handshake phase
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub factor: f64,
}

/// Feed client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    /// Subscribe/query calls open a connection when none exists
    #[serde(default = "default_auto_connect")]
    pub auto_connect: bool,

    /// Capacity of the client event channel. Feed events that find it full are
    /// dropped and counted; lifecycle events wait for room.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Cap on the inflated size of one payload
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// What to do after a terminal handshake failure or a dropped socket
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Reconnect policy after a terminal connection error or a socket drop
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_enabled")]
    pub enabled: bool,

    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub factor: f64,

    /// None retries forever
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// API credentials for the private order/balance feed
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub key: Option<String>,

    #[serde(default)]
    pub secret: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            http_base: default_http_base(),
            ws_base: default_ws_base(),
            hub: default_hub(),
            client_protocol: default_client_protocol(),
            user_agent: default_user_agent(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            min_delay_ms: default_retry_min_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            factor: default_backoff_factor(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            auto_connect: default_auto_connect(),
            event_buffer: default_event_buffer(),
            max_payload_bytes: default_max_payload_bytes(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconnect_enabled(),
            initial_delay_ms: default_reconnect_initial_delay_ms(),
            max_delay_ms: default_reconnect_max_delay_ms(),
            factor: default_backoff_factor(),
            max_attempts: None,
        }
    }
}

fn default_http_base() -> String {
    "https://bittrex.com/signalr".to_string()
}

fn default_ws_base() -> String {
    "wss://bittrex.com/signalr".to_string()
}

fn default_hub() -> String {
    "c2".to_string()
}

fn default_client_protocol() -> String {
    "1.5".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (iPhone; CPU iPhone OS 11_0 like Mac OS X) AppleWebKit/604.1.38 \
     (KHTML, like Gecko) Version/11.0 Mobile/15A372 Safari/604.1"
        .to_string()
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_ping_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_min_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_auto_connect() -> bool {
    true
}

fn default_event_buffer() -> usize {
    1024
}

fn default_max_payload_bytes() -> usize {
    crate::feed::decode::DEFAULT_MAX_INFLATED_BYTES
}

fn default_reconnect_enabled() -> bool {
    true
}

fn default_reconnect_initial_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

/// Backoff delay before retry number `attempt` (1-based), capped at `max`
fn backoff(initial_ms: u64, max_ms: u64, factor: f64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32) as i32;
    let delay = initial_ms as f64 * factor.max(1.0).powi(exponent);
    Duration::from_millis(delay.min(max_ms as f64) as u64)
}

impl ConnectionConfig {
    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[inline]
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff(self.min_delay_ms, self.max_delay_ms, self.factor, attempt)
    }
}

impl ReconnectConfig {
    /// Delay before reconnect number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff(self.initial_delay_ms, self.max_delay_ms, self.factor, attempt)
    }

    /// Whether reconnect number `attempt` (1-based) is allowed
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

impl AuthConfig {
    /// Credentials from HUB_API_KEY/HUB_API_SECRET, falling back to the file.
    /// Empty values count as absent.
    pub fn credentials(&self) -> Option<Credentials> {
        let key = std::env::var("HUB_API_KEY").ok().or_else(|| self.key.clone())?;
        let secret = std::env::var("HUB_API_SECRET")
            .ok()
            .or_else(|| self.secret.clone())?;
        Credentials::new(key, secret)
    }
}

impl Config {
    /// Load configuration from config.toml file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from(config_path)
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File not found - use defaults
                Ok(Config::default())
            }
            Err(e) => Err(ConfigError::IoError(e)),
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading file
    IoError(std::io::Error),
    /// Parse error (invalid TOML)
    ParseError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::ParseError(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(_) => None,
        }
    }
}
