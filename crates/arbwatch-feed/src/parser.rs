//! Log line classification.
//!
//! The bot writes two dialects into the same log:
//! 1. Free-text diagnostics, some of which carry market counts
//!    ("Updating reserves for 120 markets").
//! 2. Line-delimited JSON records tagged by `type`
//!    (`MARKET_UPDATE`, `TRANSACTION`).
//!
//! Both recognizers run on every line. Neither ever fails: anything that
//! does not match cleanly becomes [`ParsedEvent::Ignored`].

use arbwatch_telemetry::Metrics;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, trace};

/// Wei per ether, as a decimal scale.
const ETH_DECIMALS: u32 = 18;

static TOTAL_MARKETS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Updating reserves for (\d+) markets").unwrap());

static ACTIVE_MARKETS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Filtered pairs for arbitrage calculation: (\d+)").unwrap());

/// Which market counter a free-text line reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Markets whose reserves are being refreshed.
    TotalMarkets,
    /// Pairs surviving the arbitrage filter.
    ActiveMarkets,
}

/// A transaction reported by the bot.
///
/// Serialized in the shape viewers expect:
/// `{hash, type, timestamp, status, profit}` with `profit` defaulting to `"0"`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub hash: String,
    #[serde(rename = "type")]
    pub tx_type: String,
    /// Unix milliseconds as reported by the bot.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    pub status: String,
    /// Profit in wei, kept as the original decimal string.
    #[serde(rename = "profit", serialize_with = "profit_or_zero")]
    pub profit_wei: Option<String>,
}

impl TransactionRecord {
    /// Profit converted to ETH, if present and numeric.
    pub fn profit_eth(&self) -> Option<f64> {
        self.profit_wei.as_deref().and_then(wei_to_eth)
    }
}

fn profit_or_zero<S: Serializer>(profit: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(profit.as_deref().unwrap_or("0"))
}

/// Typed result of classifying one log line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// A market counter from a free-text line.
    MetricSignal { kind: MetricKind, value: u64 },
    /// A `MARKET_UPDATE` record: only refreshes the last-update time.
    MarketRefresh,
    /// A `TRANSACTION` record.
    Transaction(TransactionRecord),
    /// Nothing usable on this line.
    Ignored,
}

impl ParsedEvent {
    /// Short label used for metrics and logs.
    pub fn kind_label(&self) -> &'static str {
        match self {
            ParsedEvent::MetricSignal {
                kind: MetricKind::TotalMarkets,
                ..
            } => "total_markets",
            ParsedEvent::MetricSignal {
                kind: MetricKind::ActiveMarkets,
                ..
            } => "active_markets",
            ParsedEvent::MarketRefresh => "market_refresh",
            ParsedEvent::Transaction(_) => "transaction",
            ParsedEvent::Ignored => "ignored",
        }
    }
}

/// Structured record as written by the bot. Every field is optional so that
/// partially populated records still deserialize.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    record_type: Option<String>,
    hash: Option<Value>,
    #[serde(rename = "transactionType")]
    transaction_type: Option<Value>,
    timestamp: Option<Value>,
    status: Option<Value>,
    profit: Option<Value>,
}

/// Stateless line classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventParser;

impl EventParser {
    pub fn new() -> Self {
        Self
    }

    /// Classify a line.
    ///
    /// Always returns at least one event; `[Ignored]` when neither
    /// recognizer matched.
    pub fn parse(&self, line: &str) -> Vec<ParsedEvent> {
        let line = line.trim();
        if line.is_empty() {
            Metrics::event_parsed("ignored");
            return vec![ParsedEvent::Ignored];
        }

        let mut events = self.recognize_metrics(line);
        match self.recognize_structured(line) {
            ParsedEvent::Ignored => {}
            event => events.push(event),
        }

        if events.is_empty() {
            trace!(line, "Line ignored");
            events.push(ParsedEvent::Ignored);
        }

        for event in &events {
            Metrics::event_parsed(event.kind_label());
        }
        events
    }

    /// Free-text recognizer: market counters embedded in diagnostic lines.
    pub fn recognize_metrics(&self, line: &str) -> Vec<ParsedEvent> {
        [
            (MetricKind::TotalMarkets, &*TOTAL_MARKETS_RE),
            (MetricKind::ActiveMarkets, &*ACTIVE_MARKETS_RE),
        ]
        .into_iter()
        .filter_map(|(kind, re)| {
            let captures = re.captures(line)?;
            let value = captures[1].parse::<u64>().ok()?;
            Some(ParsedEvent::MetricSignal { kind, value })
        })
        .collect()
    }

    /// JSON recognizer. Only lines starting with `{` are attempted.
    pub fn recognize_structured(&self, line: &str) -> ParsedEvent {
        if !line.starts_with('{') {
            return ParsedEvent::Ignored;
        }

        let record: RawRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "Skipping malformed JSON line");
                return ParsedEvent::Ignored;
            }
        };

        match record.record_type.as_deref() {
            Some("MARKET_UPDATE") => ParsedEvent::MarketRefresh,
            Some("TRANSACTION") => transaction_from(record),
            _ => ParsedEvent::Ignored,
        }
    }
}

fn transaction_from(record: RawRecord) -> ParsedEvent {
    let Some(hash) = record.hash.as_ref().and_then(scalar_text) else {
        debug!("TRANSACTION record without hash");
        return ParsedEvent::Ignored;
    };

    ParsedEvent::Transaction(TransactionRecord {
        hash,
        tx_type: record
            .transaction_type
            .as_ref()
            .and_then(scalar_text)
            .unwrap_or_default(),
        timestamp_ms: record.timestamp.as_ref().and_then(timestamp_ms).unwrap_or(0),
        status: record.status.as_ref().and_then(scalar_text).unwrap_or_default(),
        profit_wei: record.profit.as_ref().and_then(value_to_string),
    })
}

/// Milliseconds from a number or a numeric string.
fn timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// The profit field as written: strings verbatim, numbers in their JSON form.
fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Text of a scalar field. Numbers and booleans keep their JSON spelling;
/// empty strings, nulls and containers read as absent.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(b.to_string()),
        other => value_to_string(other),
    }
}

/// Convert an integer wei amount (decimal string, optionally signed) to ETH.
///
/// Returns `None` for anything that is not an integer or does not fit the
/// 96-bit decimal mantissa.
pub fn wei_to_eth(wei: &str) -> Option<f64> {
    let wei: i128 = wei.trim().parse().ok()?;
    Decimal::try_from_i128_with_scale(wei, ETH_DECIMALS)
        .ok()?
        .to_f64()
}
