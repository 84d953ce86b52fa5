//! Log subscriber setup for the arbwatch binaries.
//!
//! Ingest, relay and dashboard events all go through `tracing`. The filter
//! defaults to `info` everywhere with `debug` for the arbwatch crates, so
//! tail cursors, upstream reconnects and viewer churn are visible without
//! setting `RUST_LOG`.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,arbwatch=debug";

/// Output encoding for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, with the active span chain attached.
    Json,
    /// Multi-line human output with event targets.
    Pretty,
}

impl LogFormat {
    /// `Json` when the deployment environment is `production`.
    pub fn for_environment(env: Option<&str>) -> Self {
        match env.map(str::trim) {
            Some(env) if env.eq_ignore_ascii_case("production") => Self::Json,
            _ => Self::Pretty,
        }
    }

    fn from_env() -> Self {
        Self::for_environment(std::env::var("RUST_ENV").ok().as_deref())
    }
}

/// Filter from `RUST_LOG`, or [`DEFAULT_FILTER`] when unset or invalid.
fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber, choosing the format from `RUST_ENV`.
///
/// Fails if a subscriber is already installed.
pub fn init_logging() -> TelemetryResult<()> {
    let registry = tracing_subscriber::registry().with(filter());

    let installed = match LogFormat::from_env() {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_target(true))
            .try_init(),
    };

    installed.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}
