//! Log ingestion for arbwatch.
//!
//! Tails the bot's append-only log, classifies each line into a typed
//! event and folds the events into a bounded in-memory aggregate.
//!
//! ```text
//! LogTailer ──lines──▶ EventParser ──ParsedEvent──▶ AggregateState
//!     ▲
//! WatchCursor (byte offset)
//! ```

pub mod aggregate;
pub mod backfill;
pub mod cursor;
pub mod error;
pub mod parser;
pub mod tailer;

pub use aggregate::{AggregateState, MarketMetrics, ProfitPoint, PROFIT_HISTORY_CAP};
pub use backfill::{read_recent_lines, BACKFILL_LINES};
pub use cursor::{CursorAdvance, WatchCursor};
pub use error::{FeedError, FeedResult};
pub use parser::{wei_to_eth, EventParser, MetricKind, ParsedEvent, TransactionRecord};
pub use tailer::{LogTailer, TailStart, TailWatch, WakeStrategy};
