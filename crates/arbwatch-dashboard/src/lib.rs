//! arbwatch-dashboard - Live fan-out of bot activity to remote viewers.
//!
//! This crate owns everything between the parsed event stream and the
//! viewer sockets:
//!
//! - Viewer registry with a bounded outbound queue per viewer
//! - WebSocket endpoint pushing named `{event, data}` frames
//! - `POST /update` injection, REST snapshot and Prometheus metrics
//! - Host status sampling (CPU, memory, uptime, last block)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         arbwatch process                          │
//! │                                                                  │
//! │  ┌──────────────┐   ┌───────────────┐   ┌──────────────────┐     │
//! │  │  tail loop   │   │  RelayBridge  │   │  BlockWatcher    │     │
//! │  │ (direct mode)│   │ (relay mode)  │   │  (optional)      │     │
//! │  └──────┬───────┘   └───────┬───────┘   └────────┬─────────┘     │
//! │         └───────────────────┼────────────────────┘               │
//! │                             ▼                                    │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │   DashboardState (aggregate + SystemSampler + last block)   │  │
//! │  └──────────────────────────┬─────────────────────────────────┘  │
//! │                             ▼                                    │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │   BroadcastHub (viewer id → bounded queue)                  │  │
//! │  └──────────────────────────┬─────────────────────────────────┘  │
//! │                             ▼                                    │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │   axum HTTP server (port 3001)                              │  │
//! │  │  GET  /ws           → WebSocket upgrade                     │  │
//! │  │  POST /update       → inject {eventName, data}              │  │
//! │  │  GET  /api/snapshot → JSON state                            │  │
//! │  │  GET  /metrics      → Prometheus text                       │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use arbwatch_dashboard::{
//!     run_server, BroadcastHub, DashboardConfig, DashboardState, StatusCadence, SystemSampler,
//! };
//!
//! let config = DashboardConfig::default();
//! let state = DashboardState::new(
//!     BroadcastHub::new(config.viewer_queue_capacity),
//!     SystemSampler::new(),
//! );
//!
//! state.ingest_line("Updating reserves for 120 markets");
//!
//! let cadence = StatusCadence::PerViewer(std::time::Duration::from_secs(1));
//! run_server(state, config, cadence, shutdown_token).await?;
//! ```

pub mod broadcast;
pub mod config;
pub mod error;
pub mod hub;
pub mod server;
pub mod state;
pub mod system;
pub mod types;

pub use broadcast::{run_status_ticker, StatusCadence};
pub use config::DashboardConfig;
pub use error::{DashboardError, DashboardResult};
pub use hub::{BroadcastHub, ViewerId, ViewerSubscription, DEFAULT_QUEUE_CAPACITY};
pub use server::{bind, create_router, run_server, serve, AppState};
pub use state::DashboardState;
pub use system::SystemSampler;
pub use types::{
    DashboardSnapshot, Frame, HubEvent, NewBlock, SystemSnapshot, UpdateRequest, MARKET_METRICS,
    NEW_BLOCK, PROFIT, SYSTEM_STATUS, TRANSACTION,
};
