//! Configuration schema structs

use std::time::Duration;

use hbridge_protocol::{ApprovalMode, MAX_MESSAGE_SIZE};
use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub approval: ApprovalConfig,
    pub scripting: ScriptingConfig,
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind (default: localhost)
    pub host: String,
    /// Preferred port (default: 9876)
    pub port: u16,
    /// Ports tried in order when the preferred one is taken
    pub fallback_ports: Vec<u16>,
    /// Largest accepted WebSocket message in bytes (default: 10 MiB)
    pub max_message_size: usize,
    /// How long `stop()` waits for the worker thread, in milliseconds
    pub stop_timeout_ms: u64,
    /// Tokio worker threads on the bridge thread
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 9876,
            fallback_ports: vec![9877, 9878, 9879],
            max_message_size: MAX_MESSAGE_SIZE,
            stop_timeout_ms: 5000,
            worker_threads: 2,
        }
    }
}

impl ServerConfig {
    /// Preferred port followed by the fallbacks
    pub fn candidate_ports(&self) -> Vec<u16> {
        std::iter::once(self.port)
            .chain(self.fallback_ports.iter().copied())
            .collect()
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// What a headless operator answers to approval prompts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadlessPolicy {
    #[default]
    Deny,
    Approve,
}

/// Approval gate settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Mode at startup (default: auto)
    pub default_mode: ApprovalMode,
    /// Answer given when running with `--headless` (default: deny)
    pub headless_policy: HeadlessPolicy,
}

/// Script command settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptingConfig {
    /// Register a script runtime for `execute_python`/`execute_script`
    pub enabled: bool,
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
