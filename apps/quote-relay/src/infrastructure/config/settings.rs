//! Relay Configuration Settings
//!
//! Configuration types for the quote relay, loaded from environment variables.

use std::time::Duration;

/// Upstream API key.
///
/// Restricted to URL-unreserved characters so it can be placed in the
/// query string verbatim.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    /// Validate and wrap an API key.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the key is empty or contains characters
    /// that would need percent-encoding.
    pub fn new(api_key: String) -> Result<Self, ConfigError> {
        if api_key.is_empty() {
            return Err(ConfigError::EmptyValue(API_KEY_VAR.to_string()));
        }
        if !api_key.chars().all(is_unreserved) {
            return Err(ConfigError::InvalidValue {
                key: API_KEY_VAR.to_string(),
                reason: "must contain only URL-unreserved characters".to_string(),
            });
        }
        Ok(Self { api_key })
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

const fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Upstream WebSocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Query parameter that carries the API key.
    pub api_key_param: String,
    /// Heartbeat ping interval (zero disables pings).
    pub heartbeat_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter fraction applied to each delay.
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Connect at startup rather than on the first client.
    pub connect_on_start: bool,
}

impl UpstreamSettings {
    /// Settings for `url` with default timings.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key_param: "apikey".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            reconnect_delay_initial: Duration::from_millis(3000),
            reconnect_delay_max: Duration::from_secs(300),
            reconnect_delay_multiplier: 1.5,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 10,
            connect_on_start: true,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Downstream WebSocket port.
    pub ws_port: u16,
    /// Downstream WebSocket path.
    pub ws_path: String,
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8080,
            ws_path: "/ws".to_string(),
            health_port: 8082,
        }
    }
}

/// Queue sizes.
#[derive(Debug, Clone)]
pub struct BufferSettings {
    /// Per-client outbound queue capacity.
    pub client_buffer: usize,
    /// Relay actor event queue capacity.
    pub event_queue: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            client_buffer: 1024,
            event_queue: 4096,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream credential.
    pub credentials: Credentials,
    /// Upstream connection settings.
    pub upstream: UpstreamSettings,
    /// Server settings.
    pub server: ServerSettings,
    /// Queue sizes.
    pub buffers: BufferSettings,
}

const API_KEY_VAR: &str = "MARKET_DATA_API_KEY";
const WS_URL_VAR: &str = "MARKET_DATA_WS_URL";
const MULTIPLIER_VAR: &str = "QUOTE_RELAY_RECONNECT_DELAY_MULTIPLIER";
const JITTER_VAR: &str = "QUOTE_RELAY_RECONNECT_JITTER";

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing,
    /// empty, or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = required(API_KEY_VAR)?;
        let credentials = Credentials::new(api_key)?;

        let url = required(WS_URL_VAR)?;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue {
                key: WS_URL_VAR.to_string(),
                reason: "must start with ws:// or wss://".to_string(),
            });
        }

        let defaults = UpstreamSettings::with_url(url.clone());
        let api_key_param = std::env::var("MARKET_DATA_API_KEY_PARAM")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.api_key_param);

        let upstream = UpstreamSettings {
            url,
            api_key_param,
            heartbeat_interval: parse_env_duration_secs(
                "QUOTE_RELAY_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                "QUOTE_RELAY_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "QUOTE_RELAY_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "QUOTE_RELAY_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: validate_multiplier(
                MULTIPLIER_VAR,
                parse_env_f64(MULTIPLIER_VAR, defaults.reconnect_delay_multiplier),
            )?,
            reconnect_jitter: validate_jitter(
                JITTER_VAR,
                parse_env_f64(JITTER_VAR, defaults.reconnect_jitter),
            )?,
            max_reconnect_attempts: parse_env_u32(
                "QUOTE_RELAY_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            connect_on_start: parse_env_bool("QUOTE_RELAY_CONNECT_ON_START", defaults.connect_on_start),
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            ws_port: parse_env_u16("QUOTE_RELAY_WS_PORT", server_defaults.ws_port),
            ws_path: normalize_path(
                std::env::var("QUOTE_RELAY_WS_PATH").unwrap_or(server_defaults.ws_path),
            ),
            health_port: parse_env_u16("QUOTE_RELAY_HEALTH_PORT", server_defaults.health_port),
        };

        let buffer_defaults = BufferSettings::default();
        let buffers = BufferSettings {
            client_buffer: parse_env_usize("QUOTE_RELAY_CLIENT_BUFFER", buffer_defaults.client_buffer)
                .max(1),
            event_queue: parse_env_usize("QUOTE_RELAY_EVENT_QUEUE", buffer_defaults.event_queue)
                .max(1),
        };

        Ok(Self {
            credentials,
            upstream,
            server,
            buffers,
        })
    }

    /// Upstream URL with the API key appended as a query parameter.
    #[must_use]
    pub fn upstream_url(&self) -> String {
        append_query(
            &self.upstream.url,
            &self.upstream.api_key_param,
            self.credentials.api_key(),
        )
    }

    /// Upstream URL with the API key replaced for logging.
    #[must_use]
    pub fn redacted_upstream_url(&self) -> String {
        append_query(&self.upstream.url, &self.upstream.api_key_param, "[REDACTED]")
    }
}

/// Append `param=value` to `url`, respecting an existing query string.
#[must_use]
pub fn append_query(url: &str, param: &str, value: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{param}={value}")
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("environment variable {key} is invalid: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn required(key: &str) -> Result<String, ConfigError> {
    let value = std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn normalize_path(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Backoff multiplier must be finite and at least 1.
fn validate_multiplier(key: &str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value >= 1.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("must be a finite number >= 1, got {value}"),
        })
    }
}

/// Jitter is a fraction of the delay in `[0, 1]`.
fn validate_jitter(key: &str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("must be a fraction between 0 and 1, got {value}"),
        })
    }
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
