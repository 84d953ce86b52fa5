//! In-memory rollup of everything parsed from the log.
//!
//! Scalars are last-write-wins, transactions are upserted by hash and the
//! profit history is a FIFO capped at [`PROFIT_HISTORY_CAP`] entries.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;

use crate::parser::{MetricKind, ParsedEvent, TransactionRecord};

/// Maximum number of profit points retained.
pub const PROFIT_HISTORY_CAP: usize = 50;

/// Market counters as pushed to viewers (`marketMetrics`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketMetrics {
    pub total_markets: u64,
    pub active_markets: u64,
    pub last_update: DateTime<Utc>,
}

/// One realised profit sample (`profit` event payload).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfitPoint {
    pub timestamp: DateTime<Utc>,
    /// Profit in ETH.
    pub profit: f64,
}

/// Aggregate state derived from parsed events.
#[derive(Debug, Clone)]
pub struct AggregateState {
    total_markets: u64,
    active_markets: u64,
    last_market_update: DateTime<Utc>,
    transactions: HashMap<String, TransactionRecord>,
    profit_history: VecDeque<ProfitPoint>,
}

impl AggregateState {
    pub fn new() -> Self {
        Self {
            total_markets: 0,
            active_markets: 0,
            last_market_update: Utc::now(),
            transactions: HashMap::new(),
            profit_history: VecDeque::with_capacity(PROFIT_HISTORY_CAP),
        }
    }

    /// Fold one event into the state, stamped with the current time.
    pub fn apply(&mut self, event: &ParsedEvent) {
        self.apply_at(event, Utc::now());
    }

    /// Fold one event into the state with an explicit "now".
    pub fn apply_at(&mut self, event: &ParsedEvent, now: DateTime<Utc>) {
        match event {
            ParsedEvent::MetricSignal { kind, value } => {
                match kind {
                    MetricKind::TotalMarkets => self.total_markets = *value,
                    MetricKind::ActiveMarkets => self.active_markets = *value,
                }
                self.last_market_update = now;
            }
            ParsedEvent::MarketRefresh => {
                self.last_market_update = now;
            }
            ParsedEvent::Transaction(record) => {
                if let Some(point) = profit_point(record, now) {
                    self.push_profit(point);
                }
                trace!(hash = %record.hash, status = %record.status, "Transaction upserted");
                self.transactions
                    .insert(record.hash.clone(), record.clone());
            }
            ParsedEvent::Ignored => {}
        }
    }

    fn push_profit(&mut self, point: ProfitPoint) {
        while self.profit_history.len() >= PROFIT_HISTORY_CAP {
            self.profit_history.pop_front();
        }
        self.profit_history.push_back(point);
    }

    pub fn market_metrics(&self) -> MarketMetrics {
        MarketMetrics {
            total_markets: self.total_markets,
            active_markets: self.active_markets,
            last_update: self.last_market_update,
        }
    }

    pub fn total_markets(&self) -> u64 {
        self.total_markets
    }

    pub fn active_markets(&self) -> u64 {
        self.active_markets
    }

    pub fn last_market_update(&self) -> DateTime<Utc> {
        self.last_market_update
    }

    pub fn transaction(&self, hash: &str) -> Option<&TransactionRecord> {
        self.transactions.get(hash)
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// All transactions, newest first by reported timestamp.
    pub fn transactions_newest_first(&self) -> Vec<TransactionRecord> {
        let mut records: Vec<TransactionRecord> = self.transactions.values().cloned().collect();
        records.sort_by(|a, b| {
            b.timestamp_ms
                .cmp(&a.timestamp_ms)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        records
    }

    /// Profit history, oldest first.
    pub fn profit_history(&self) -> impl ExactSizeIterator<Item = &ProfitPoint> {
        self.profit_history.iter()
    }

    /// Most recently recorded profit point.
    pub fn latest_profit(&self) -> Option<&ProfitPoint> {
        self.profit_history.back()
    }
}

impl Default for AggregateState {
    fn default() -> Self {
        Self::new()
    }
}

/// Profit point for a transaction, timestamped by the record itself when it
/// carries a usable timestamp.
fn profit_point(record: &TransactionRecord, now: DateTime<Utc>) -> Option<ProfitPoint> {
    let profit = record.profit_eth()?;
    let timestamp = Some(record.timestamp_ms)
        .filter(|ms| *ms > 0)
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(now);
    Some(ProfitPoint { timestamp, profit })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(hash: &str, status: &str, profit_wei: Option<&str>, timestamp_ms: i64) -> ParsedEvent {
        ParsedEvent::Transaction(TransactionRecord {
            hash: hash.to_string(),
            tx_type: "swap".to_string(),
            timestamp_ms,
            status: status.to_string(),
            profit_wei: profit_wei.map(str::to_string),
        })
    }

    #[test]
    fn test_metric_signals_update_scalars() {
        let mut state = AggregateState::new();
        let now = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap();

        state.apply_at(
            &ParsedEvent::MetricSignal {
                kind: MetricKind::TotalMarkets,
                value: 120,
            },
            now,
        );
        assert_eq!(state.total_markets(), 120);
        assert_eq!(state.active_markets(), 0);
        assert_eq!(state.last_market_update(), now);

        state.apply(&ParsedEvent::MetricSignal {
            kind: MetricKind::ActiveMarkets,
            value: 37,
        });
        assert_eq!(state.total_markets(), 120);
        assert_eq!(state.active_markets(), 37);
        assert!(state.last_market_update() > now);
    }

    #[test]
    fn test_market_refresh_only_touches_timestamp() {
        let mut state = AggregateState::new();
        let later = Utc::now() + chrono::Duration::seconds(5);

        state.apply_at(&ParsedEvent::MarketRefresh, later);

        let metrics = state.market_metrics();
        assert_eq!(metrics.total_markets, 0);
        assert_eq!(metrics.active_markets, 0);
        assert_eq!(metrics.last_update, later);
    }

    #[test]
    fn test_ignored_is_noop() {
        let mut state = AggregateState::new();
        let before = state.market_metrics();
        state.apply(&ParsedEvent::Ignored);
        assert_eq!(state.market_metrics(), before);
        assert_eq!(state.transaction_count(), 0);
    }

    #[test]
    fn test_transaction_upsert_keeps_latest_status() {
        let mut state = AggregateState::new();
        state.apply(&tx("0xabc", "pending", None, 1));
        state.apply(&tx("0xabc", "success", None, 2));

        assert_eq!(state.transaction_count(), 1);
        assert_eq!(state.transaction("0xabc").unwrap().status, "success");
        assert_eq!(state.profit_history().len(), 0);
    }

    #[test]
    fn test_profit_history_is_bounded_fifo() {
        let mut state = AggregateState::new();
        let total = PROFIT_HISTORY_CAP + 17;

        for i in 0..total {
            let wei = format!("{}", (i as u128 + 1) * 1_000_000_000_000_000);
            state.apply(&tx(&format!("0x{i:x}"), "success", Some(&wei), 0));
        }

        let history: Vec<f64> = state.profit_history().map(|p| p.profit).collect();
        assert_eq!(history.len(), PROFIT_HISTORY_CAP);

        let expected: Vec<f64> = (total - PROFIT_HISTORY_CAP..total)
            .map(|i| (i as f64 + 1.0) / 1000.0)
            .collect();
        for (got, want) in history.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-12, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_profit_point_uses_record_timestamp() {
        let mut state = AggregateState::new();
        state.apply(&tx(
            "0xabc",
            "success",
            Some("1000000000000000000"),
            1_700_000_000_000,
        ));

        let point = state.latest_profit().unwrap();
        assert_eq!(point.profit, 1.0);
        assert_eq!(point.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_unconvertible_profit_records_transaction_only() {
        let mut state = AggregateState::new();
        state.apply(&tx("0xdef", "success", Some("1.5"), 0));

        assert!(state.transaction("0xdef").is_some());
        assert!(state.latest_profit().is_none());
    }

    #[test]
    fn test_transactions_newest_first() {
        let mut state = AggregateState::new();
        state.apply(&tx("0x1", "success", None, 10));
        state.apply(&tx("0x2", "success", None, 30));
        state.apply(&tx("0x3", "success", None, 20));

        let hashes: Vec<String> = state
            .transactions_newest_first()
            .into_iter()
            .map(|t| t.hash)
            .collect();
        assert_eq!(hashes, vec!["0x2", "0x3", "0x1"]);
    }

    #[test]
    fn test_market_metrics_serialization() {
        let state = AggregateState::new();
        let json = serde_json::to_value(state.market_metrics()).unwrap();
        assert_eq!(json["totalMarkets"], 0);
        assert_eq!(json["activeMarkets"], 0);
        assert!(json["lastUpdate"].is_string());
    }
}
