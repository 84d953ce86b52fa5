//! Startup backfill from an existing log.
//!
//! Seeds the aggregate after a restart by replaying the tail end of a log.
//! The tail cursor is not involved: the live tailer starts at end of file.

use std::path::Path;

use tokio::fs;
use tracing::info;

use crate::error::{FeedError, FeedResult};

/// Default number of trailing lines replayed on startup.
pub const BACKFILL_LINES: usize = 1000;

/// Read at most `max_lines` of the most recent lines of `path`.
///
/// A missing file is not an error; it simply yields nothing.
pub async fn read_recent_lines(path: &Path, max_lines: usize) -> FeedResult<Vec<String>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No log to backfill from yet");
            return Ok(Vec::new());
        }
        Err(e) => return Err(FeedError::io(path, e)),
    };

    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(max_lines);

    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}
