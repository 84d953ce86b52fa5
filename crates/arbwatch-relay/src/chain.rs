//! Chain head watcher.
//!
//! Subscribes to `newHeads` over an Ethereum JSON-RPC WebSocket and records
//! each block in the dashboard (`lastBlock` plus a `newBlock` push).

use arbwatch_dashboard::DashboardState;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

use crate::connection::UpstreamHandler;

const SUBSCRIBE_ID: u64 = 1;

/// A decoded message from the node.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainMessage {
    /// Subscription accepted.
    Subscribed(String),
    /// New block header.
    Head { number: u64, timestamp: DateTime<Utc> },
    /// JSON-RPC error reply.
    Error(String),
    Other,
}

/// `newHeads` subscriber.
#[derive(Clone, Debug)]
pub struct BlockWatcher {
    state: DashboardState,
}

impl BlockWatcher {
    pub fn new(state: DashboardState) -> Self {
        Self { state }
    }

    /// The `eth_subscribe` request sent on every connect.
    pub fn subscribe_request() -> String {
        json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_ID,
            "method": "eth_subscribe",
            "params": ["newHeads"],
        })
        .to_string()
    }

    pub fn handle_text(&self, text: &str) -> ChainMessage {
        let message = parse_chain_message(text);
        match &message {
            ChainMessage::Head { number, timestamp } => {
                trace!(number, "New block");
                self.state.record_block(*number, *timestamp);
            }
            ChainMessage::Subscribed(id) => info!(subscription = %id, "Subscribed to new blocks"),
            ChainMessage::Error(e) => warn!(error = %e, "Node rejected block subscription"),
            ChainMessage::Other => {}
        }
        message
    }
}

impl UpstreamHandler for BlockWatcher {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn handshake(&self) -> Vec<String> {
        vec![Self::subscribe_request()]
    }

    fn on_connected(&self) {
        info!("Connected to chain node");
    }

    fn on_text(&self, text: &str) {
        self.handle_text(text);
    }

    fn on_disconnected(&self) {
        info!("Disconnected from chain node, block updates paused");
    }
}

/// Decode one JSON-RPC frame.
pub fn parse_chain_message(text: &str) -> ChainMessage {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "Unreadable node frame");
            return ChainMessage::Other;
        }
    };

    if value.get("method").and_then(Value::as_str) == Some("eth_subscription") {
        let Some(head) = value.pointer("/params/result") else {
            return ChainMessage::Other;
        };
        let number = head.get("number").and_then(parse_quantity);
        let timestamp = head
            .get("timestamp")
            .and_then(parse_quantity)
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
        return match (number, timestamp) {
            (Some(number), Some(timestamp)) => ChainMessage::Head { number, timestamp },
            (Some(number), None) => ChainMessage::Head {
                number,
                timestamp: Utc::now(),
            },
            _ => ChainMessage::Other,
        };
    }

    if value.get("id").and_then(Value::as_u64) == Some(SUBSCRIBE_ID) {
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return ChainMessage::Error(message);
        }
        if let Some(id) = value.get("result").and_then(Value::as_str) {
            return ChainMessage::Subscribed(id.to_string());
        }
    }

    ChainMessage::Other
}

/// A JSON-RPC quantity: `0x`-prefixed hex string, decimal string or number.
pub fn parse_quantity(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}
