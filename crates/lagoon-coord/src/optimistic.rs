//! Client-local tracking of not-yet-acknowledged writes.
//!
//! The queue is strictly per-handle state: it never crosses the store
//! boundary and knows nothing about the election protocol. Callers own the
//! lifecycle: entries are only removed in bulk via [`OptimisticWriteQueue::clear`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use lagoon_types::{now_ms, OptimisticStatus, OptimisticWrite};
use parking_lot::Mutex;
use tracing::debug;

/// Per-handle optimistic write queue.
#[derive(Debug)]
pub struct OptimisticWriteQueue {
    enabled: AtomicBool,
    next_id: AtomicU64,
    entries: Mutex<Vec<OptimisticWrite>>,
}

impl OptimisticWriteQueue {
    /// Create an empty, disabled queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Toggle optimistic mode. Existing entries are kept either way.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether optimistic mode is on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Track a write; returns its unique, monotonically increasing id.
    pub fn track(&self, sql: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().push(OptimisticWrite {
            id,
            sql: sql.to_owned(),
            created_at: now_ms(),
            status: OptimisticStatus::Pending,
        });
        debug!(target: "lagoon.coord", id, "tracked optimistic write");
        id
    }

    /// Mark an entry as acknowledged by the leader.
    pub fn confirm(&self, id: u64) {
        self.set_status(id, OptimisticStatus::Confirmed);
    }

    /// Mark an entry as failed (conflict or execution error).
    pub fn fail(&self, id: u64) {
        self.set_status(id, OptimisticStatus::Failed);
    }

    fn set_status(&self, id: u64, status: OptimisticStatus) {
        if let Some(entry) = self.entries.lock().iter_mut().find(|e| e.id == id) {
            entry.status = status;
        }
    }

    /// Number of entries still pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.status == OptimisticStatus::Pending)
            .count()
    }

    /// Snapshot of all tracked entries, in tracking order.
    #[must_use]
    pub fn entries(&self) -> Vec<OptimisticWrite> {
        self.entries.lock().clone()
    }

    /// Empty the queue.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        debug!(target: "lagoon.coord", cleared = entries.len(), "cleared optimistic writes");
        entries.clear();
    }
}

impl Default for OptimisticWriteQueue {
    fn default() -> Self {
        Self::new()
    }
}
