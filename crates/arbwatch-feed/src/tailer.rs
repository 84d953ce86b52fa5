//! Incremental log tailing.
//!
//! [`LogTailer`] reads only the bytes appended since the last poll and
//! yields them as complete lines. [`TailWatch`] decides *when* to poll:
//! on a fixed interval, or on an OS change notification with the interval
//! as a fallback. Both wake strategies drive the same `poll`.

use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use arbwatch_telemetry::Metrics;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cursor::{CursorAdvance, WatchCursor};
use crate::error::{FeedError, FeedResult};

/// Default cap on a held-back unterminated fragment.
pub const MAX_FRAGMENT_BYTES: usize = 1024 * 1024;

/// Where a fresh tailer positions its cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TailStart {
    /// Deliver the whole existing file on the first poll.
    Beginning,
    /// Skip existing content; only bytes appended after opening are delivered.
    #[default]
    End,
}

/// What wakes the tail loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeStrategy {
    /// Poll the file size on a fixed interval.
    #[default]
    Polling,
    /// OS change notifications, with the interval kept as a fallback.
    Notify,
}

/// Tails one append-only log file.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    cursor: WatchCursor,
    /// Bytes after the last line terminator, completed by a later poll.
    pending: Vec<u8>,
    max_fragment: usize,
    reset_on_truncate: bool,
}

impl LogTailer {
    /// Open a tailer, creating the log (and its parent directories) if missing.
    pub async fn open(path: impl Into<PathBuf>, start: TailStart) -> FeedResult<Self> {
        let path = path.into();
        ensure_exists(&path).await?;

        let cursor = match start {
            TailStart::Beginning => WatchCursor::new(),
            TailStart::End => {
                let size = fs::metadata(&path)
                    .await
                    .map_err(|e| FeedError::io(&path, e))?
                    .len();
                WatchCursor::at(size)
            }
        };

        info!(path = %path.display(), offset = cursor.offset(), "Tailing log");

        Ok(Self {
            path,
            cursor,
            pending: Vec::new(),
            max_fragment: MAX_FRAGMENT_BYTES,
            reset_on_truncate: true,
        })
    }

    /// Choose whether a shrinking file rewinds the cursor (default) or stalls it.
    pub fn with_reset_on_truncate(mut self, reset: bool) -> Self {
        self.reset_on_truncate = reset;
        self
    }

    /// Longest unterminated fragment held back before it is delivered as a
    /// line of its own.
    pub fn with_max_fragment(mut self, bytes: usize) -> Self {
        self.max_fragment = bytes.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> WatchCursor {
        self.cursor
    }

    /// Read whatever was appended since the last poll.
    ///
    /// Returns the complete lines in the new byte range, in file order. An
    /// empty vector means the file did not grow.
    pub async fn poll(&mut self) -> FeedResult<Vec<String>> {
        let size = match fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Log disappeared, recreating");
                ensure_exists(&self.path).await?;
                0
            }
            Err(e) => return Err(FeedError::io(&self.path, e)),
        };

        match self.cursor.observe(size) {
            CursorAdvance::Unchanged => Ok(Vec::new()),
            CursorAdvance::Grew(range) => self.read_range(range).await,
            CursorAdvance::Shrunk { offset, size } => {
                if !self.reset_on_truncate {
                    debug!(offset, size, "Log smaller than cursor, waiting for growth");
                    return Ok(Vec::new());
                }
                warn!(offset, size, "Log truncated, rewinding cursor");
                Metrics::tail_truncated();
                self.cursor.reset();
                self.pending.clear();
                if size == 0 {
                    return Ok(Vec::new());
                }
                self.read_range(0..size).await
            }
        }
    }

    async fn read_range(&mut self, range: Range<u64>) -> FeedResult<Vec<String>> {
        let mut file = fs::File::open(&self.path)
            .await
            .map_err(|e| FeedError::io(&self.path, e))?;
        file.seek(SeekFrom::Start(range.start))
            .await
            .map_err(|e| FeedError::io(&self.path, e))?;

        let mut buf = Vec::with_capacity((range.end - range.start) as usize);
        let read = file
            .take(range.end - range.start)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| FeedError::io(&self.path, e))?;

        self.cursor.advance_to(range.start + read as u64);
        Metrics::tail_bytes(read as u64);

        self.pending.extend_from_slice(&buf);
        let mut lines = drain_complete_lines(&mut self.pending);
        if let Some(line) = flush_oversized(&mut self.pending, self.max_fragment) {
            warn!(
                path = %self.path.display(),
                bytes = line.len(),
                "Unterminated line over the fragment limit, delivering it as is"
            );
            lines.push(line);
        }
        Ok(lines)
    }
}

/// Split off every newline-terminated line from `pending`, leaving the
/// unterminated tail in place.
fn drain_complete_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let Some(last_newline) = pending.iter().rposition(|&b| b == b'\n') else {
        return Vec::new();
    };

    let complete: Vec<u8> = pending.drain(..=last_newline).collect();
    complete[..complete.len() - 1]
        .split(|&b| b == b'\n')
        .map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            String::from_utf8_lossy(line).into_owned()
        })
        .collect()
}

/// Take the whole of `pending` as one line once it exceeds `limit` bytes.
fn flush_oversized(pending: &mut Vec<u8>, limit: usize) -> Option<String> {
    if pending.len() <= limit {
        return None;
    }
    let line = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    Some(line)
}

async fn ensure_exists(path: &Path) -> FeedResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| FeedError::io(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| FeedError::io(path, e))?;
    Ok(())
}

/// Wake source for the tail loop.
///
/// Dropping a `TailWatch` releases the OS file watch.
pub struct TailWatch {
    interval: Interval,
    notify_rx: Option<mpsc::Receiver<()>>,
    _watcher: Option<RecommendedWatcher>,
}

impl TailWatch {
    pub fn new(strategy: WakeStrategy, path: &Path, poll_interval: Duration) -> FeedResult<Self> {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (notify_rx, watcher) = match strategy {
            WakeStrategy::Polling => (None, None),
            WakeStrategy::Notify => {
                // Capacity 1: a burst of writes collapses into a single wake-up.
                let (tx, rx) = mpsc::channel(1);
                let mut watcher =
                    notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                        if let Ok(event) = res {
                            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                                let _ = tx.try_send(());
                            }
                        }
                    })?;
                watcher.watch(path, RecursiveMode::NonRecursive)?;
                (Some(rx), Some(watcher))
            }
        };

        debug!(?strategy, interval_ms = poll_interval.as_millis() as u64, "Tail watch ready");

        Ok(Self {
            interval,
            notify_rx,
            _watcher: watcher,
        })
    }

    /// Resolve when the log should be polled again.
    pub async fn changed(&mut self) {
        let mut notifier_closed = false;

        match self.notify_rx.as_mut() {
            Some(rx) => {
                tokio::select! {
                    _ = self.interval.tick() => {}
                    msg = rx.recv() => notifier_closed = msg.is_none(),
                }
            }
            None => {
                self.interval.tick().await;
            }
        }

        if notifier_closed {
            warn!("File watcher stopped, falling back to polling");
            self.notify_rx = None;
            self._watcher = None;
        }
    }
}

impl std::fmt::Debug for TailWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailWatch")
            .field("period", &self.interval.period())
            .field("notify", &self.notify_rx.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_creates_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("output.log");

        let mut tailer = LogTailer::open(&path, TailStart::End).await.unwrap();

        assert!(path.exists());
        assert_eq!(tailer.cursor().offset(), 0);
        assert!(tailer.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cursor_tracks_appended_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.log");
        let mut tailer = LogTailer::open(&path, TailStart::End).await.unwrap();

        let batches = [
            "first line\n",
            "second line\nthird line\n",
            "{\"type\":\"MARKET_UPDATE\"}\n",
        ];
        let mut total = 0u64;
        for batch in batches {
            append(&path, batch);
            total += batch.len() as u64;

            let lines = tailer.poll().await.unwrap();
            let expected: Vec<String> = batch.lines().map(str::to_string).collect();
            assert_eq!(lines, expected);
            assert_eq!(tailer.cursor().offset(), total);
        }
    }

    #[tokio::test]
    async fn test_poll_without_growth_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.log");
        let mut tailer = LogTailer::open(&path, TailStart::End).await.unwrap();

        append(&path, "line\n");
        assert_eq!(tailer.poll().await.unwrap().len(), 1);
        let offset = tailer.cursor().offset();

        assert!(tailer.poll().await.unwrap().is_empty());
        assert!(tailer.poll().await.unwrap().is_empty());
        assert_eq!(tailer.cursor().offset(), offset);
    }

    #[tokio::test]
    async fn test_start_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.log");
        std::fs::write(&path, "old one\nold two\n").unwrap();

        let mut from_end = LogTailer::open(&path, TailStart::End).await.unwrap();
        assert!(from_end.poll().await.unwrap().is_empty());

        let mut from_start = LogTailer::open(&path, TailStart::Beginning).await.unwrap();
        assert_eq!(
            from_start.poll().await.unwrap(),
            vec!["old one".to_string(), "old two".to_string()]
        );
    }

    #[tokio::test]
    async fn test_partial_line_is_held_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.log");
        let mut tailer = LogTailer::open(&path, TailStart::End).await.unwrap();

        append(&path, "Updating reserves ");
        assert!(tailer.poll().await.unwrap().is_empty());
        assert_eq!(tailer.cursor().offset(), 18);

        append(&path, "for 120 markets\r\nnext");
        assert_eq!(
            tailer.poll().await.unwrap(),
            vec!["Updating reserves for 120 markets".to_string()]
        );

        append(&path, "\n");
        assert_eq!(tailer.poll().await.unwrap(), vec!["next".to_string()]);
    }

    #[tokio::test]
    async fn test_truncation_rewinds_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.log");
        let mut tailer = LogTailer::open(&path, TailStart::End).await.unwrap();

        append(&path, "a fairly long line before rotation\n");
        tailer.poll().await.unwrap();

        std::fs::write(&path, "fresh\n").unwrap();
        assert_eq!(tailer.poll().await.unwrap(), vec!["fresh".to_string()]);
        assert_eq!(tailer.cursor().offset(), 6);
    }

    #[tokio::test]
    async fn test_truncation_stalls_when_reset_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.log");
        let mut tailer = LogTailer::open(&path, TailStart::End)
            .await
            .unwrap()
            .with_reset_on_truncate(false);

        append(&path, "a fairly long line before rotation\n");
        tailer.poll().await.unwrap();

        std::fs::write(&path, "fresh\n").unwrap();
        assert!(tailer.poll().await.unwrap().is_empty());
        assert_eq!(tailer.cursor().offset(), 35);
    }

    #[test]
    fn test_drain_complete_lines_keeps_fragment() {
        let mut pending = b"one\ntwo\nthr".to_vec();
        assert_eq!(drain_complete_lines(&mut pending), vec!["one", "two"]);
        assert_eq!(pending, b"thr");

        let mut blank = b"\n\n".to_vec();
        assert_eq!(drain_complete_lines(&mut blank), vec!["", ""]);
        assert!(blank.is_empty());
    }

    #[tokio::test]
    async fn test_polling_watch_wakes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.log");
        std::fs::write(&path, "").unwrap();

        let mut watch =
            TailWatch::new(WakeStrategy::Polling, &path, Duration::from_millis(10)).unwrap();
        let woke = tokio::time::timeout(Duration::from_secs(1), async {
            watch.changed().await;
            watch.changed().await;
        })
        .await;
        tokio_test::assert_ok!(woke);
    }

    #[tokio::test]
    async fn test_oversized_fragment_is_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.log");
        let mut tailer = LogTailer::open(&path, TailStart::End)
            .await
            .unwrap()
            .with_max_fragment(8);

        append(&path, "short");
        assert!(tailer.poll().await.unwrap().is_empty());

        append(&path, " but never ending");
        assert_eq!(
            tailer.poll().await.unwrap(),
            vec!["short but never ending".to_string()]
        );

        append(&path, "ok\n");
        assert_eq!(tailer.poll().await.unwrap(), vec!["ok".to_string()]);
    }

    #[test]
    fn test_flush_oversized_respects_limit() {
        let mut pending = b"12345".to_vec();
        assert_eq!(flush_oversized(&mut pending, 5), None);
        assert_eq!(pending.len(), 5);
        assert_eq!(flush_oversized(&mut pending, 4).as_deref(), Some("12345"));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_notify_watch_wakes_before_fallback_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.log");
        std::fs::write(&path, "").unwrap();

        let mut watch =
            TailWatch::new(WakeStrategy::Notify, &path, Duration::from_secs(60)).unwrap();
        // The interval's first tick is immediate.
        watch.changed().await;

        let idle = tokio::time::timeout(Duration::from_millis(200), watch.changed()).await;
        tokio_test::assert_err!(idle);

        append(&path, "new line\n");
        let woke = tokio::time::timeout(Duration::from_secs(5), watch.changed()).await;
        tokio_test::assert_ok!(woke);
    }

    #[tokio::test]
    async fn test_notify_watch_falls_back_to_polling_when_watcher_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.log");
        std::fs::write(&path, "").unwrap();

        let mut watch =
            TailWatch::new(WakeStrategy::Notify, &path, Duration::from_secs(60)).unwrap();
        watch.changed().await;
        assert!(watch.notify_rx.is_some());

        // Dropping the watcher closes the notification channel.
        watch._watcher = None;
        let woke = tokio::time::timeout(Duration::from_secs(1), watch.changed()).await;
        tokio_test::assert_ok!(woke);
        assert!(watch.notify_rx.is_none());
        assert!(format!("{watch:?}").contains("notify: false"));
    }
}
