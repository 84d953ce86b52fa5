//! Dashboard configuration.

use serde::{Deserialize, Serialize};

/// Dashboard server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origin allowed by CORS. `*` allows any.
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
    /// Frames buffered per viewer before it is considered stalled.
    #[serde(default = "default_viewer_queue_capacity")]
    pub viewer_queue_capacity: usize,
    /// Per-viewer status interval in direct mode.
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    /// Broadcast status interval in relay mode.
    #[serde(default = "default_relay_status_interval_ms")]
    pub relay_status_interval_ms: u64,
}

fn default_port() -> u16 {
    3001
}

fn default_allowed_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_viewer_queue_capacity() -> usize {
    crate::hub::DEFAULT_QUEUE_CAPACITY
}

fn default_status_interval_ms() -> u64 {
    1000
}

fn default_relay_status_interval_ms() -> u64 {
    2000
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            allowed_origin: default_allowed_origin(),
            viewer_queue_capacity: default_viewer_queue_capacity(),
            status_interval_ms: default_status_interval_ms(),
            relay_status_interval_ms: default_relay_status_interval_ms(),
        }
    }
}

impl DashboardConfig {
    /// Whether CORS should accept any origin.
    pub fn any_origin(&self) -> bool {
        self.allowed_origin.trim() == "*"
    }
}
