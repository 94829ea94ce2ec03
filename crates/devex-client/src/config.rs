//! Session configuration.
//!
//! All fields have working defaults so `SessionConfig::default()` connects to
//! a local runner out of the box. Files are TOML; every field is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};

fn default_runner_host() -> String {
    "localhost:8000".to_string()
}

fn default_outbound_queue() -> usize {
    256
}

fn default_offline_queue() -> usize {
    64
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    50
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

/// What `emit` does while the session is offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflinePolicy {
    /// Buffer frames in a bounded queue and flush them on reconnect. When the
    /// queue is full the oldest frame is dropped.
    #[default]
    Queue,
    /// Fail immediately with `NotConnected`.
    FailFast,
}

/// Reconnection backoff parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Consecutive failed attempts before the session gives up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Runner host and port, without scheme.
    #[serde(default = "default_runner_host")]
    pub runner_host: String,
    /// Use `wss://` instead of `ws://`.
    pub use_tls: bool,
    pub reconnect: ReconnectConfig,
    /// Capacity of the live outbound queue.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    /// Capacity of the offline buffer used by [`OfflinePolicy::Queue`].
    #[serde(default = "default_offline_queue")]
    pub offline_queue: usize,
    pub offline_policy: OfflinePolicy,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            runner_host: default_runner_host(),
            use_tls: false,
            reconnect: ReconnectConfig::default(),
            outbound_queue: default_outbound_queue(),
            offline_queue: default_offline_queue(),
            offline_policy: OfflinePolicy::default(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// WebSocket endpoint for a workspace.
    pub fn ws_url(&self, workspace_id: &str) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!(
            "{}://{}/{}/api/v1/repl/ws",
            scheme, self.runner_host, workspace_id
        )
    }
}
