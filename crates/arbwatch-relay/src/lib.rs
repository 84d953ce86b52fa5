//! Upstream feeds for arbwatch.
//!
//! - [`RelayBridge`]: republishes the bot's own `{event, data}` stream
//! - [`BlockWatcher`]: follows chain heads over JSON-RPC `eth_subscribe`
//!
//! Both run inside an [`UpstreamLink`], which redials with exponential
//! backoff until cancelled.

pub mod bridge;
pub mod chain;
pub mod connection;
pub mod error;

pub use bridge::{RelayAction, RelayBridge, RelayFrame};
pub use chain::{parse_chain_message, parse_quantity, BlockWatcher, ChainMessage};
pub use connection::{Backoff, LinkState, UpstreamConfig, UpstreamHandler, UpstreamLink};
pub use error::{RelayError, RelayResult};
