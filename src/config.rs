//! Configuration for the OBS bridge.

use serde::{Deserialize, Serialize};

/// Configuration for connecting to OBS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObsConfig {
    /// OBS WebSocket host.
    #[serde(default = "default_host")]
    pub host: String,

    /// OBS WebSocket port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// OBS WebSocket password (if authentication is enabled).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// How often the daemon ticks for stats and elapsed-time updates
    /// (in milliseconds).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_ms: u64,

    /// Initial delay before a reconnection attempt (in milliseconds).
    /// Doubles per attempt up to `max_backoff_ms`.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Cap on the reconnection backoff delay (in milliseconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Maximum number of reconnection attempts (0 = unlimited).
    #[serde(default)]
    pub max_reconnect_attempts: u32,

    /// Whether a rejected password should be retried like any other
    /// connection failure. Off by default: a bad password does not
    /// self-correct, so the daemon fails fast.
    #[serde(default)]
    pub retry_on_auth_failure: bool,

    /// Whether to poll performance stats into the state file.
    #[serde(default = "default_show_stats")]
    pub show_stats: bool,

    /// Deadline for a single request/response round trip (in milliseconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Debounce window for state-file writes (in milliseconds). Bursts of
    /// mutations inside one window collapse into a single write.
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    4455
}

fn default_stats_interval() -> u64 {
    1000 // 1 second
}

fn default_reconnect_interval() -> u64 {
    5000 // 5 seconds
}

fn default_max_backoff() -> u64 {
    60_000 // 1 minute
}

fn default_show_stats() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    5000
}

fn default_debounce() -> u64 {
    75
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
            stats_interval_ms: default_stats_interval(),
            reconnect_interval_ms: default_reconnect_interval(),
            max_backoff_ms: default_max_backoff(),
            max_reconnect_attempts: 0,
            retry_on_auth_failure: false,
            show_stats: default_show_stats(),
            request_timeout_ms: default_request_timeout(),
            debounce_ms: default_debounce(),
        }
    }
}

impl ObsConfig {
    /// Returns the WebSocket URL.
    #[must_use]
    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}
