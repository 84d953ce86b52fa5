//! Byte-offset cursor over an append-only log.

use std::ops::Range;

/// Outcome of comparing the observed log size with the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorAdvance {
    /// Nothing new since the last read.
    Unchanged,
    /// The log grew; this byte range has not been delivered yet.
    Grew(Range<u64>),
    /// The log is smaller than the cursor (truncated or replaced).
    Shrunk { offset: u64, size: u64 },
}

/// Last-read byte offset into a log source.
///
/// The offset never exceeds the last observed size and only moves forward,
/// except through [`WatchCursor::reset`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchCursor {
    offset: u64,
}

impl WatchCursor {
    /// Cursor at the start of the log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor positioned at `offset` (used when resuming from the end).
    pub fn at(offset: u64) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Classify a newly observed size against the cursor without moving it.
    pub fn observe(&self, size: u64) -> CursorAdvance {
        use std::cmp::Ordering;

        match size.cmp(&self.offset) {
            Ordering::Greater => CursorAdvance::Grew(self.offset..size),
            Ordering::Equal => CursorAdvance::Unchanged,
            Ordering::Less => CursorAdvance::Shrunk {
                offset: self.offset,
                size,
            },
        }
    }

    /// Move the cursor forward after a successful read. Backward moves are ignored.
    pub fn advance_to(&mut self, offset: u64) {
        if offset > self.offset {
            self.offset = offset;
        }
    }

    /// Rewind to the start of the log.
    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_growth() {
        let cursor = WatchCursor::at(10);
        assert_eq!(cursor.observe(25), CursorAdvance::Grew(10..25));
        assert_eq!(cursor.observe(10), CursorAdvance::Unchanged);
        assert_eq!(
            cursor.observe(4),
            CursorAdvance::Shrunk { offset: 10, size: 4 }
        );
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut cursor = WatchCursor::new();
        cursor.advance_to(42);
        cursor.advance_to(7);
        assert_eq!(cursor.offset(), 42);

        cursor.reset();
        assert_eq!(cursor.offset(), 0);
    }
}
