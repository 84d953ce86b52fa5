//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed error: {0}")]
    Feed(#[from] arbwatch_feed::FeedError),

    #[error("Dashboard error: {0}")]
    Dashboard(#[from] arbwatch_dashboard::DashboardError),

    #[error("Relay error: {0}")]
    Relay(#[from] arbwatch_relay::RelayError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] arbwatch_telemetry::TelemetryError),

    #[error("Task failed: {0}")]
    Task(String),
}

pub type AppResult<T> = Result<T, AppError>;
