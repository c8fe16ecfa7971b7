//! Streaming-cursor handle table.
//!
//! Each open stream is a boxed [`RowCursor`] addressed by an arena handle.
//! The fetch protocol: batches arrive in result order, an empty batch
//! signals exhaustion, and fetching again after exhaustion stays empty.
//! Closing is explicit; closing the same handle twice is a protocol error,
//! which requires remembering closed handles rather than just forgetting
//! them.

use std::collections::BTreeSet;

use lagoon_error::{LagoonError, Result};
use lagoon_types::Row;
use tracing::debug;

use crate::engine::RowCursor;
use crate::handles::HandleArena;

/// Handle table for open streams.
pub struct CursorManager {
    streams: HandleArena<Box<dyn RowCursor>>,
    /// Every handle below this watermark was closed. Arena handles are
    /// monotone, so `closed` only has to hold out-of-order closes at or
    /// above it, keeping the memory bounded by the oldest open stream.
    closed_below: u64,
    closed: BTreeSet<u64>,
}

impl CursorManager {
    /// An empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: HandleArena::new(),
            closed_below: 1,
            closed: BTreeSet::new(),
        }
    }

    /// Register a cursor and return its stream handle.
    pub fn open(&mut self, cursor: Box<dyn RowCursor>) -> u64 {
        let handle = self.streams.insert(cursor);
        debug!(target: "lagoon.core", handle, "stream opened");
        handle
    }

    /// Fetch up to `batch_size` rows from the stream behind `handle`.
    pub fn fetch_next(&mut self, handle: u64, batch_size: usize) -> Result<Vec<Row>> {
        let cursor = self
            .streams
            .get_mut(handle)
            .ok_or(LagoonError::StreamNotFound { handle })?;
        cursor.next_batch(batch_size)
    }

    /// Release the stream behind `handle`.
    pub fn close(&mut self, handle: u64) -> Result<()> {
        if self.streams.remove(handle).is_some() {
            self.mark_closed(handle);
            debug!(target: "lagoon.core", handle, "stream closed");
            return Ok(());
        }
        if self.was_closed(handle) {
            return Err(LagoonError::StreamAlreadyClosed { handle });
        }
        Err(LagoonError::StreamNotFound { handle })
    }

    fn mark_closed(&mut self, handle: u64) {
        self.closed.insert(handle);
        // Fold any contiguous closed prefix into the watermark.
        while self.closed.remove(&self.closed_below) {
            self.closed_below += 1;
        }
    }

    fn was_closed(&self, handle: u64) -> bool {
        handle < self.closed_below || self.closed.contains(&handle)
    }

    /// Number of open streams.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.streams.len()
    }

    /// Drop every open stream, as on handle close.
    pub fn close_all(&mut self) {
        self.streams.clear();
    }
}

impl Default for CursorManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CursorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorManager")
            .field("open", &self.streams.len())
            .field("closed", &self.closed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MaterializedCursor;
    use lagoon_types::Value;

    fn numbered_cursor(n: i64) -> Box<dyn RowCursor> {
        let rows = (0..n).map(|i| Row::new(vec![Value::Integer(i)])).collect();
        Box::new(MaterializedCursor::new(vec!["n".to_owned()], rows))
    }

    #[test]
    fn fetch_until_empty_then_stays_empty() {
        let mut mgr = CursorManager::new();
        let handle = mgr.open(numbered_cursor(5));

        let mut total = 0;
        loop {
            let batch = mgr.fetch_next(handle, 2).unwrap();
            if batch.is_empty() {
                break;
            }
            total += batch.len();
        }
        assert_eq!(total, 5);
        assert!(mgr.fetch_next(handle, 2).unwrap().is_empty());

        mgr.close(handle).unwrap();
    }

    #[test]
    fn double_close_is_a_protocol_error() {
        let mut mgr = CursorManager::new();
        let handle = mgr.open(numbered_cursor(1));
        mgr.close(handle).unwrap();
        assert!(matches!(
            mgr.close(handle),
            Err(LagoonError::StreamAlreadyClosed { .. })
        ));
    }

    #[test]
    fn unknown_handle_is_not_found() {
        let mut mgr = CursorManager::new();
        assert!(matches!(
            mgr.fetch_next(99, 10),
            Err(LagoonError::StreamNotFound { handle: 99 })
        ));
        assert!(matches!(
            mgr.close(99),
            Err(LagoonError::StreamNotFound { handle: 99 })
        ));
    }

    #[test]
    fn out_of_order_closes_fold_into_the_watermark() {
        let mut mgr = CursorManager::new();
        let a = mgr.open(numbered_cursor(1));
        let b = mgr.open(numbered_cursor(1));
        let c = mgr.open(numbered_cursor(1));

        mgr.close(c).unwrap();
        mgr.close(a).unwrap();
        mgr.close(b).unwrap();

        // Double-close detection survives the folding.
        for handle in [a, b, c] {
            assert!(matches!(
                mgr.close(handle),
                Err(LagoonError::StreamAlreadyClosed { handle: h }) if h == handle
            ));
        }
        // All three collapsed into the watermark; nothing is retained
        // per handle.
        assert!(mgr.closed.is_empty());
        assert_eq!(mgr.closed_below, c + 1);

        // A handle above the watermark that never existed is still
        // distinguished from a closed one.
        assert!(matches!(
            mgr.close(c + 5),
            Err(LagoonError::StreamNotFound { .. })
        ));
    }

    #[test]
    fn fetch_after_close_is_not_found() {
        let mut mgr = CursorManager::new();
        let handle = mgr.open(numbered_cursor(3));
        mgr.close(handle).unwrap();
        assert!(matches!(
            mgr.fetch_next(handle, 1),
            Err(LagoonError::StreamNotFound { .. })
        ));
    }
}
