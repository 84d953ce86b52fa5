//! arbwatch - live monitor for an arbitrage bot.
//!
//! Main application that wires the pipeline together:
//! - Log tailing and event aggregation (direct mode)
//! - Relay of the bot's own event stream (relay mode)
//! - Optional chain head tracking
//! - WebSocket fan-out to dashboard viewers

pub mod app;
pub mod config;
pub mod error;

pub use app::{backfill, join_workers, run_tail_loop, Application};
pub use config::{AppConfig, ChainConfig, RelayConfig, RunMode, TailConfig};
pub use error::{AppError, AppResult};
