//! Dashboard state management.
//!
//! DashboardState ties the aggregate, the viewer hub and the host sampler
//! together. It supports two deployments:
//! - Direct mode: log lines are parsed and folded into an owned aggregate,
//!   and every visible change is pushed to viewers.
//! - Relay mode: no aggregate; events arrive already formed from the bot's
//!   own stream and are republished as-is.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arbwatch_feed::{AggregateState, EventParser, MarketMetrics, ParsedEvent};
use arbwatch_telemetry::Metrics;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::hub::{BroadcastHub, ViewerId, ViewerSubscription};
use crate::system::SystemSampler;
use crate::types::{
    DashboardSnapshot, HubEvent, NewBlock, SystemSnapshot, MARKET_METRICS, NEW_BLOCK, PROFIT,
    SYSTEM_STATUS, TRANSACTION,
};

/// Shared state handed to the server, the tail loop and the relay.
#[derive(Clone)]
pub struct DashboardState {
    hub: BroadcastHub,
    sampler: SystemSampler,
    /// Parsed-log aggregate (None in relay mode).
    aggregate: Option<Arc<RwLock<AggregateState>>>,
    parser: EventParser,
    last_block: Arc<AtomicU64>,
}

impl DashboardState {
    /// Create state for direct mode with a fresh aggregate.
    pub fn new(hub: BroadcastHub, sampler: SystemSampler) -> Self {
        Self::with_aggregate(hub, sampler, AggregateState::new())
    }

    /// Create state for direct mode around an existing aggregate.
    pub fn with_aggregate(
        hub: BroadcastHub,
        sampler: SystemSampler,
        aggregate: AggregateState,
    ) -> Self {
        Self {
            hub,
            sampler,
            aggregate: Some(Arc::new(RwLock::new(aggregate))),
            parser: EventParser::new(),
            last_block: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create state for relay mode (no aggregate).
    pub fn new_relay_mode(hub: BroadcastHub, sampler: SystemSampler) -> Self {
        Self {
            hub,
            sampler,
            aggregate: None,
            parser: EventParser::new(),
            last_block: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_relay_mode(&self) -> bool {
        self.aggregate.is_none()
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Register a viewer and queue its initial snapshot: `systemStatus`,
    /// plus `marketMetrics` when an aggregate is attached.
    ///
    /// The aggregate read lock is held across registration so no publish can
    /// slip between the snapshot and the viewer joining the registry.
    pub fn register_viewer(&self) -> ViewerSubscription {
        let mut initial = Vec::with_capacity(2);
        push_event(&mut initial, SYSTEM_STATUS, &self.system_status());

        match &self.aggregate {
            Some(aggregate) => {
                let state = aggregate.read();
                push_event(&mut initial, MARKET_METRICS, &state.market_metrics());
                self.hub.register(initial)
            }
            None => self.hub.register(initial),
        }
    }

    /// Fresh host status.
    pub fn system_status(&self) -> SystemSnapshot {
        self.sampler.sample(self.last_block())
    }

    pub fn last_block(&self) -> u64 {
        self.last_block.load(Ordering::Relaxed)
    }

    pub fn market_metrics(&self) -> Option<MarketMetrics> {
        self.aggregate.as_ref().map(|a| a.read().market_metrics())
    }

    /// Parse one log line, apply it and push every visible change.
    ///
    /// Returns the number of non-ignored events. A no-op in relay mode.
    pub fn ingest_line(&self, line: &str) -> usize {
        let Some(aggregate) = &self.aggregate else {
            return 0;
        };
        let events = self.parser.parse(line);

        let mut state = aggregate.write();
        let mut applied = 0;
        for event in &events {
            state.apply(event);
            match event {
                ParsedEvent::MetricSignal { .. } | ParsedEvent::MarketRefresh => {
                    self.hub.publish(MARKET_METRICS, &state.market_metrics());
                }
                ParsedEvent::Transaction(record) => {
                    self.hub.publish(TRANSACTION, record);
                    if record.profit_eth().is_some() {
                        if let Some(point) = state.latest_profit() {
                            self.hub.publish(PROFIT, point);
                        }
                    }
                }
                ParsedEvent::Ignored => continue,
            }
            applied += 1;
        }
        applied
    }

    /// Ingest a batch of live lines in order.
    pub fn ingest_lines<I, S>(&self, lines: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut count = 0u64;
        let mut applied = 0;
        for line in lines {
            applied += self.ingest_line(line.as_ref());
            count += 1;
        }
        if count > 0 {
            Metrics::lines_ingested("live", count);
            trace!(lines = count, applied, "Ingested lines");
        }
        applied
    }

    /// Seed the aggregate from historical lines without notifying viewers.
    pub fn replay_lines<I, S>(&self, lines: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(aggregate) = &self.aggregate else {
            warn!("Replay requested in relay mode, ignoring");
            return 0;
        };

        let mut state = aggregate.write();
        let mut count = 0u64;
        let mut applied = 0;
        for line in lines {
            count += 1;
            for event in self.parser.parse(line.as_ref()) {
                if event != ParsedEvent::Ignored {
                    applied += 1;
                }
                state.apply(&event);
            }
        }
        Metrics::lines_ingested("backfill", count);
        debug!(lines = count, applied, "Replayed historical lines");
        applied
    }

    /// Broadcast an already-formed event (`POST /update`, relay republish).
    pub fn publish(&self, event: &str, data: &Value) -> usize {
        self.hub.publish(event, data)
    }

    /// Broadcast a fresh `systemStatus` to all viewers.
    pub fn publish_system_status(&self) -> usize {
        self.hub.publish(SYSTEM_STATUS, &self.system_status())
    }

    /// Send a fresh `systemStatus` to one viewer.
    pub fn send_system_status(&self, id: ViewerId) -> bool {
        self.hub.send_to(id, SYSTEM_STATUS, &self.system_status())
    }

    /// Record a block from the chain watcher and announce it as `newBlock`.
    pub fn record_block(&self, number: u64, timestamp: DateTime<Utc>) -> usize {
        self.last_block.store(number, Ordering::Relaxed);
        self.hub.publish(NEW_BLOCK, &NewBlock { number, timestamp })
    }

    /// Record a block reported by the relay upstream and push it inside a
    /// fresh `systemStatus`.
    pub fn publish_block_status(&self, number: u64) -> usize {
        self.last_block.store(number, Ordering::Relaxed);
        self.publish_system_status()
    }

    /// Collect a full snapshot of the current state.
    pub fn collect_snapshot(&self) -> DashboardSnapshot {
        let timestamp_ms = Utc::now().timestamp_millis();
        let system_status = self.system_status();

        let (market_metrics, transactions, profit_history) = match &self.aggregate {
            Some(aggregate) => {
                let state = aggregate.read();
                (
                    Some(state.market_metrics()),
                    state.transactions_newest_first(),
                    state.profit_history().cloned().collect(),
                )
            }
            None => (None, Vec::new(), Vec::new()),
        };

        DashboardSnapshot {
            timestamp_ms,
            system_status,
            market_metrics,
            transactions,
            profit_history,
            viewers: self.hub.viewer_count(),
        }
    }
}

fn push_event<T: serde::Serialize + ?Sized>(events: &mut Vec<HubEvent>, name: &str, payload: &T) {
    match HubEvent::new(name, payload) {
        Ok(event) => events.push(event),
        Err(e) => warn!(error = %e, event = name, "Failed to serialize snapshot event"),
    }
}

impl std::fmt::Debug for DashboardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardState")
            .field("relay_mode", &self.is_relay_mode())
            .field("viewers", &self.hub.viewer_count())
            .field("last_block", &self.last_block())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn direct() -> DashboardState {
        DashboardState::new(BroadcastHub::default(), SystemSampler::new())
    }

    fn next_event(sub: &mut ViewerSubscription) -> Value {
        let frame = sub.try_recv().expect("frame queued");
        serde_json::from_str(&frame).unwrap()
    }

    #[test]
    fn test_new_viewer_gets_status_and_metrics() {
        let state = direct();
        let mut sub = state.register_viewer();

        assert_eq!(next_event(&mut sub)["event"], "systemStatus");
        let metrics = next_event(&mut sub);
        assert_eq!(metrics["event"], "marketMetrics");
        assert_eq!(metrics["data"]["totalMarkets"], 0);
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn test_relay_viewer_gets_status_only() {
        let state = DashboardState::new_relay_mode(BroadcastHub::default(), SystemSampler::new());
        let mut sub = state.register_viewer();

        assert_eq!(next_event(&mut sub)["event"], "systemStatus");
        assert!(sub.try_recv().is_err());
        assert!(state.market_metrics().is_none());
    }

    #[test]
    fn test_total_markets_line_pushes_metrics() {
        let state = direct();
        let mut sub = state.register_viewer();
        next_event(&mut sub);
        next_event(&mut sub);

        assert_eq!(state.ingest_line("Updating reserves for 120 markets"), 1);

        let pushed = next_event(&mut sub);
        assert_eq!(pushed["event"], "marketMetrics");
        assert_eq!(pushed["data"]["totalMarkets"], 120);
        assert_eq!(state.market_metrics().unwrap().total_markets, 120);
    }

    #[test]
    fn test_active_markets_line_pushes_metrics() {
        let state = direct();
        let mut sub = state.register_viewer();
        next_event(&mut sub);
        next_event(&mut sub);

        state.ingest_line("Filtered pairs for arbitrage calculation: 37");

        let pushed = next_event(&mut sub);
        assert_eq!(pushed["data"]["activeMarkets"], 37);
        assert_eq!(state.market_metrics().unwrap().active_markets, 37);
    }

    #[test]
    fn test_transaction_line_pushes_transaction_and_profit() {
        let state = direct();
        let mut sub = state.register_viewer();
        next_event(&mut sub);
        next_event(&mut sub);

        let line = r#"{"type":"TRANSACTION","hash":"0xabc","transactionType":"swap","timestamp":1700000000000,"status":"success","profit":"1000000000000000000"}"#;
        assert_eq!(state.ingest_line(line), 1);

        let tx = next_event(&mut sub);
        assert_eq!(tx["event"], "transaction");
        assert_eq!(tx["data"]["hash"], "0xabc");
        assert_eq!(tx["data"]["profit"], "1000000000000000000");

        let profit = next_event(&mut sub);
        assert_eq!(profit["event"], "profit");
        assert_eq!(profit["data"]["profit"], 1.0);

        let snapshot = state.collect_snapshot();
        assert_eq!(snapshot.transactions.len(), 1);
        assert_eq!(snapshot.profit_history.len(), 1);
    }

    #[test]
    fn test_transaction_without_profit_pushes_no_profit() {
        let state = direct();
        let mut sub = state.register_viewer();
        next_event(&mut sub);
        next_event(&mut sub);

        state.ingest_line(r#"{"type":"TRANSACTION","hash":"0x1","status":"pending"}"#);

        assert_eq!(next_event(&mut sub)["event"], "transaction");
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn test_ignored_lines_push_nothing() {
        let state = direct();
        let mut sub = state.register_viewer();
        next_event(&mut sub);
        next_event(&mut sub);

        assert_eq!(state.ingest_lines(["not json at all", "{invalid"]), 0);
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn test_replay_is_silent() {
        let state = direct();
        let mut sub = state.register_viewer();
        next_event(&mut sub);
        next_event(&mut sub);

        let applied = state.replay_lines([
            "Updating reserves for 5 markets",
            "noise",
            "Filtered pairs for arbitrage calculation: 2",
        ]);
        assert_eq!(applied, 2);
        assert!(sub.try_recv().is_err());

        let metrics = state.market_metrics().unwrap();
        assert_eq!((metrics.total_markets, metrics.active_markets), (5, 2));
    }

    #[test]
    fn test_record_block_publishes_new_block() {
        let state = direct();
        let mut sub = state.register_viewer();
        next_event(&mut sub);
        next_event(&mut sub);

        let ts = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        state.record_block(18_000_000, ts);

        let block = next_event(&mut sub);
        assert_eq!(block["event"], "newBlock");
        assert_eq!(block["data"]["number"], 18_000_000);
        assert_eq!(state.system_status().last_block, 18_000_000);
    }

    #[test]
    fn test_relay_block_status() {
        let state = DashboardState::new_relay_mode(BroadcastHub::default(), SystemSampler::new());
        let mut sub = state.register_viewer();
        next_event(&mut sub);

        state.publish_block_status(123);

        let status = next_event(&mut sub);
        assert_eq!(status["event"], "systemStatus");
        assert_eq!(status["data"]["lastBlock"], 123);
        // Relay mode never parses log lines.
        assert_eq!(state.ingest_line("Updating reserves for 1 markets"), 0);
    }

    #[test]
    fn test_publish_passthrough() {
        let state = direct();
        let mut sub = state.register_viewer();
        next_event(&mut sub);
        next_event(&mut sub);

        state.publish("customEvent", &json!({"x": 1}));
        assert_eq!(
            next_event(&mut sub),
            json!({"event": "customEvent", "data": {"x": 1}})
        );
    }
}
