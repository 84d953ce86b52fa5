//! Relay from the bot's own event stream to local viewers.
//!
//! Frames arrive as `{"event": name, "data": payload}`. Market, transaction
//! and profit events are republished untouched; `newBlock` is folded into a
//! fresh `systemStatus`.

use arbwatch_dashboard::{DashboardState, MARKET_METRICS, NEW_BLOCK, PROFIT, TRANSACTION};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::chain::parse_quantity;
use crate::connection::UpstreamHandler;

/// One frame from the upstream event stream.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// What the bridge did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Forwarded verbatim to `n` viewers.
    Republished(usize),
    /// `newBlock` turned into a `systemStatus` with this block.
    BlockStatus(u64),
    /// Upstream lifecycle notice, logged only.
    Lifecycle,
    /// Unknown event or unreadable frame.
    Ignored,
}

/// Bridges an upstream event stream into the local hub.
#[derive(Clone, Debug)]
pub struct RelayBridge {
    state: DashboardState,
}

impl RelayBridge {
    pub fn new(state: DashboardState) -> Self {
        Self { state }
    }

    /// Handle one raw text frame.
    pub fn handle_text(&self, text: &str) -> RelayAction {
        match serde_json::from_str::<RelayFrame>(text) {
            Ok(frame) => self.handle_frame(frame),
            Err(e) => {
                debug!(error = %e, "Skipping unreadable relay frame");
                RelayAction::Ignored
            }
        }
    }

    pub fn handle_frame(&self, frame: RelayFrame) -> RelayAction {
        match frame.event.as_str() {
            MARKET_METRICS | TRANSACTION | PROFIT => {
                let receivers = self.state.publish(&frame.event, &frame.data);
                trace!(event = %frame.event, receivers, "Relayed event");
                RelayAction::Republished(receivers)
            }
            NEW_BLOCK => match frame.data.get("number").and_then(parse_quantity) {
                Some(number) => {
                    self.state.publish_block_status(number);
                    RelayAction::BlockStatus(number)
                }
                None => {
                    warn!(data = %frame.data, "newBlock without a usable number");
                    RelayAction::Ignored
                }
            },
            "connect" => {
                info!("Bot reported connect");
                RelayAction::Lifecycle
            }
            "disconnect" => {
                info!("Bot reported disconnect");
                RelayAction::Lifecycle
            }
            other => {
                debug!(event = other, "Ignoring unknown relay event");
                RelayAction::Ignored
            }
        }
    }
}

impl UpstreamHandler for RelayBridge {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn on_connected(&self) {
        info!("Connected to bot event stream");
    }

    fn on_text(&self, text: &str) {
        self.handle_text(text);
    }

    fn on_disconnected(&self) {
        info!("Disconnected from bot event stream");
    }
}
