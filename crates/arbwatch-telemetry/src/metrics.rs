//! Prometheus metrics for the arbwatch pipeline.
//!
//! Covers each stage of ingest → aggregate → fan-out:
//! - Log tailing (bytes read, lines delivered, truncation resets)
//! - Parsing (events by kind)
//! - Broadcasting (events published, viewers connected/dropped)
//! - Upstream connections (relay and chain endpoints)
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric
//! names, which is a programming error caught on first access at startup.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, TextEncoder,
};

use crate::error::TelemetryResult;

/// Bytes read from the tailed log.
pub static TAIL_BYTES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("arbwatch_tail_bytes_total", "Bytes read from the tailed log").unwrap()
});

/// Lines delivered to the parser.
/// Labels: source (tail/backfill)
pub static LINES_INGESTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "arbwatch_lines_ingested_total",
        "Log lines delivered to the parser",
        &["source"]
    )
    .unwrap()
});

/// Cursor resets caused by the log shrinking below the cursor.
pub static TAIL_TRUNCATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "arbwatch_tail_truncations_total",
        "Cursor resets after the log shrank"
    )
    .unwrap()
});

/// Parsed events.
/// Labels: kind (total_markets/active_markets/market_refresh/transaction/ignored)
pub static EVENTS_PARSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "arbwatch_events_parsed_total",
        "Events produced by the log parser",
        &["kind"]
    )
    .unwrap()
});

/// Events published to viewers.
/// Labels: event (systemStatus/marketMetrics/transaction/profit/newBlock/...)
pub static EVENTS_PUBLISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "arbwatch_events_published_total",
        "Events published through the broadcast hub",
        &["event"]
    )
    .unwrap()
});

/// Currently registered viewers.
pub static VIEWERS_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("arbwatch_viewers_connected", "Registered viewers").unwrap()
});

/// Viewers removed by the hub during dispatch.
/// Labels: reason (closed/stalled)
pub static VIEWERS_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "arbwatch_viewers_dropped_total",
        "Viewers dropped during dispatch",
        &["reason"]
    )
    .unwrap()
});

/// Upstream connection state (1 = connected).
/// Labels: upstream (relay/chain)
pub static UPSTREAM_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "arbwatch_upstream_connected",
        "Upstream connection state (1=connected)",
        &["upstream"]
    )
    .unwrap()
});

/// Upstream reconnection attempts.
pub static UPSTREAM_RECONNECT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "arbwatch_upstream_reconnect_total",
        "Upstream reconnection attempts",
        &["upstream"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn tail_bytes(n: u64) {
        TAIL_BYTES_TOTAL.inc_by(n);
    }

    pub fn lines_ingested(source: &str, n: u64) {
        LINES_INGESTED_TOTAL.with_label_values(&[source]).inc_by(n);
    }

    pub fn tail_truncated() {
        TAIL_TRUNCATIONS_TOTAL.inc();
    }

    pub fn event_parsed(kind: &str) {
        EVENTS_PARSED_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn event_published(event: &str) {
        EVENTS_PUBLISHED_TOTAL.with_label_values(&[event]).inc();
    }

    /// Set the registered viewer count.
    pub fn viewers_connected(count: usize) {
        VIEWERS_CONNECTED.set(count as i64);
    }

    pub fn viewer_dropped(reason: &str) {
        VIEWERS_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn upstream_connected(upstream: &str) {
        UPSTREAM_CONNECTED.with_label_values(&[upstream]).set(1);
    }

    pub fn upstream_disconnected(upstream: &str) {
        UPSTREAM_CONNECTED.with_label_values(&[upstream]).set(0);
    }

    pub fn upstream_reconnect(upstream: &str) {
        UPSTREAM_RECONNECT_TOTAL.with_label_values(&[upstream]).inc();
    }

    /// Render every registered collector in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
