//! Prometheus metrics and structured logging for arbwatch.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Prometheus collectors for the ingest and fan-out pipeline

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, LogFormat};
pub use metrics::Metrics;
