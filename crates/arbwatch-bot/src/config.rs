//! Application configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use arbwatch_dashboard::DashboardConfig;
use arbwatch_feed::{TailStart, WakeStrategy, BACKFILL_LINES};
use arbwatch_relay::{Backoff, UpstreamConfig};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Tail the bot log, aggregate locally and serve viewers.
    #[default]
    Direct,
    /// Republish the bot's own event stream.
    Relay,
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment mode.
    #[serde(default)]
    pub mode: RunMode,
    /// Viewer server configuration.
    #[serde(default)]
    pub dashboard: DashboardConfig,
    /// Log tailing (direct mode).
    #[serde(default)]
    pub tail: TailConfig,
    /// Upstream event stream (relay mode).
    #[serde(default)]
    pub relay: RelayConfig,
    /// Chain node for block updates (direct mode, optional).
    #[serde(default)]
    pub chain: ChainConfig,
}

/// Log tailing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailConfig {
    /// Log followed live.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    /// Historical log replayed once at startup. Unset disables backfill.
    #[serde(default = "default_backfill_path")]
    pub backfill_path: Option<PathBuf>,
    /// Trailing lines replayed from `backfill_path`.
    #[serde(default = "default_backfill_lines")]
    pub backfill_lines: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub watch_strategy: WakeStrategy,
    #[serde(default)]
    pub start_at: TailStart,
    /// Re-read from the start when the log shrinks.
    #[serde(default = "default_reset_on_truncate")]
    pub reset_on_truncate: bool,
}

fn default_log_path() -> PathBuf {
    PathBuf::from("output.log")
}

fn default_backfill_path() -> Option<PathBuf> {
    Some(PathBuf::from("bot.log"))
}

fn default_backfill_lines() -> usize {
    BACKFILL_LINES
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_reset_on_truncate() -> bool {
    true
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            backfill_path: default_backfill_path(),
            backfill_lines: default_backfill_lines(),
            poll_interval_ms: default_poll_interval_ms(),
            watch_strategy: WakeStrategy::default(),
            start_at: TailStart::default(),
            reset_on_truncate: default_reset_on_truncate(),
        }
    }
}

impl TailConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Relay upstream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Bot event stream URL.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    /// Maximum reconnection attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

fn default_upstream_url() -> String {
    "ws://localhost:8545".to_string()
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream_url: default_upstream_url(),
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl RelayConfig {
    /// Connection settings for an upstream at `url`.
    pub fn connection(&self, url: &str) -> UpstreamConfig {
        UpstreamConfig {
            url: url.to_string(),
            backoff: Backoff {
                base: Duration::from_millis(self.reconnect_base_delay_ms),
                max: Duration::from_millis(self.reconnect_max_delay_ms),
                max_attempts: self.max_reconnect_attempts,
                ..Backoff::default()
            },
            ..UpstreamConfig::default()
        }
    }
}

/// Chain node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC WebSocket endpoint. Unset disables block updates.
    #[serde(default)]
    pub ws_url: Option<String>,
}

impl AppConfig {
    /// Load from `path` if it exists, built-in defaults otherwise.
    pub fn load(path: Option<&str>) -> AppResult<Self> {
        match path {
            Some(path) if Path::new(path).exists() => Self::from_file(path),
            Some(path) => {
                tracing::warn!(path = %path, "Config file not found, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Apply environment overrides: `PORT` replaces the dashboard port and
    /// `ETHEREUM_WS_URL` fills in the chain endpoint when none is configured.
    pub fn apply_env(&mut self) -> AppResult<()> {
        self.apply_overrides(
            std::env::var("PORT").ok().as_deref(),
            std::env::var("ETHEREUM_WS_URL").ok().as_deref(),
        )
    }

    fn apply_overrides(&mut self, port: Option<&str>, chain_url: Option<&str>) -> AppResult<()> {
        if let Some(port) = port.map(str::trim).filter(|p| !p.is_empty()) {
            self.dashboard.port = port
                .parse()
                .map_err(|_| AppError::Config(format!("Invalid PORT value: {port}")))?;
        }
        if self.chain.ws_url.is_none() {
            self.chain.ws_url = chain_url
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string);
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        let checks = [
            (self.dashboard.viewer_queue_capacity == 0, "dashboard.viewer_queue_capacity"),
            (self.dashboard.status_interval_ms == 0, "dashboard.status_interval_ms"),
            (self.dashboard.relay_status_interval_ms == 0, "dashboard.relay_status_interval_ms"),
            (self.tail.poll_interval_ms == 0, "tail.poll_interval_ms"),
            (self.relay.reconnect_base_delay_ms == 0, "relay.reconnect_base_delay_ms"),
        ];
        if let Some((_, field)) = checks.iter().find(|(zero, _)| *zero) {
            return Err(AppError::Config(format!("{field} must be greater than zero")));
        }

        if self.mode == RunMode::Relay && self.relay.upstream_url.trim().is_empty() {
            return Err(AppError::Config("relay.upstream_url is required in relay mode".to_string()));
        }
        if self.tail.log_path.as_os_str().is_empty() {
            return Err(AppError::Config("tail.log_path must not be empty".to_string()));
        }
        Ok(())
    }
}
