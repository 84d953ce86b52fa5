//! Viewer wire types.
//!
//! Every frame pushed to a viewer is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`.

use std::sync::Arc;

use arbwatch_feed::{MarketMetrics, ProfitPoint, TransactionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Host status (`systemStatus`).
pub const SYSTEM_STATUS: &str = "systemStatus";
/// Market counters (`marketMetrics`).
pub const MARKET_METRICS: &str = "marketMetrics";
/// A transaction record (`transaction`).
pub const TRANSACTION: &str = "transaction";
/// A profit sample (`profit`).
pub const PROFIT: &str = "profit";
/// A new chain block (`newBlock`).
pub const NEW_BLOCK: &str = "newBlock";

/// Serialized frame shared by every viewer queue.
pub type Frame = Arc<str>;

/// A named event as sent to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEvent {
    pub event: String,
    pub data: Value,
}

impl HubEvent {
    pub fn new<T: Serialize + ?Sized>(event: &str, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            event: event.to_string(),
            data: serde_json::to_value(payload)?,
        })
    }

    /// Render as a text frame.
    pub fn to_frame(&self) -> serde_json::Result<Frame> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }
}

/// Sampled host status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemSnapshot {
    /// Average busy percentage across cores, one decimal.
    #[serde(rename = "cpuUsage")]
    pub cpu_usage_percent: f64,
    /// Used memory as a percentage of total, one decimal.
    #[serde(rename = "memoryUsage")]
    pub memory_usage_percent: f64,
    /// Process uptime in whole seconds.
    #[serde(rename = "uptime")]
    pub uptime_seconds: u64,
    /// Last chain block seen, 0 if none.
    #[serde(rename = "lastBlock")]
    pub last_block: u64,
}

/// `newBlock` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBlock {
    pub number: u64,
    pub timestamp: DateTime<Utc>,
}

/// Body of `POST /update`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub event_name: Option<String>,
    pub data: Option<Value>,
}

impl UpdateRequest {
    /// The event name and payload, if the name is non-empty and the payload
    /// is not a blank scalar.
    pub fn into_parts(self) -> Option<(String, Value)> {
        let name = self.event_name.filter(|n| !n.is_empty())?;
        let data = self.data.filter(|d| !is_blank(d))?;
        Some((name, data))
    }
}

/// `null`, `false`, zero and `""`. Empty arrays and objects still count as
/// payloads.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Full dashboard state (REST snapshot).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub timestamp_ms: i64,
    pub system_status: SystemSnapshot,
    /// Absent in relay mode, where no aggregate is kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_metrics: Option<MarketMetrics>,
    /// Newest first.
    pub transactions: Vec<TransactionRecord>,
    /// Oldest first.
    pub profit_history: Vec<ProfitPoint>,
    pub viewers: usize,
}
