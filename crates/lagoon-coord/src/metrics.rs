//! Counters and timers instrumenting the coordination protocol.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use lagoon_types::{now_ms, MetricsSnapshot};
use parking_lot::Mutex;
use tracing::debug;

/// How many recent latency samples feed the running average.
const MAX_LATENCY_SAMPLES: usize = 100;

#[derive(Debug)]
struct MetricsInner {
    leadership_changes: u64,
    write_conflicts: u64,
    follower_refreshes: u64,
    total_notifications: u64,
    avg_notification_latency_ms: f64,
    latency_samples: VecDeque<f64>,
    start_timestamp: f64,
}

impl MetricsInner {
    fn fresh() -> Self {
        Self {
            leadership_changes: 0,
            write_conflicts: 0,
            follower_refreshes: 0,
            total_notifications: 0,
            avg_notification_latency_ms: 0.0,
            latency_samples: VecDeque::new(),
            start_timestamp: now_ms(),
        }
    }
}

/// Per-handle coordination counters.
///
/// Disabled by default; `record_*` calls are no-ops until enabled. All
/// methods take `&self` because the heartbeat thread records concurrently
/// with the owning handle.
#[derive(Debug)]
pub struct CoordinationMetrics {
    enabled: AtomicBool,
    inner: Mutex<MetricsInner>,
}

impl CoordinationMetrics {
    /// Create a disabled metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            inner: Mutex::new(MetricsInner::fresh()),
        }
    }

    /// Enable or disable tracking. Disabling also resets the counters.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.reset();
        }
        debug!(target: "lagoon.coord", enabled, "coordination metrics toggled");
    }

    /// Whether tracking is on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Record a role change, in either direction.
    pub fn record_leadership_change(&self, became_leader: bool) {
        if !self.is_enabled() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.leadership_changes += 1;
        debug!(
            target: "lagoon.coord",
            became_leader,
            total = inner.leadership_changes,
            "leadership change recorded"
        );
    }

    /// Record a write rejected because the session was not the leader.
    pub fn record_write_conflict(&self) {
        if !self.is_enabled() {
            return;
        }
        self.inner.lock().write_conflicts += 1;
    }

    /// Record a follower re-reading committed state.
    pub fn record_follower_refresh(&self) {
        if !self.is_enabled() {
            return;
        }
        self.inner.lock().follower_refreshes += 1;
    }

    /// Record one notification's delivery latency and fold it into the
    /// running mean over the most recent samples.
    pub fn record_notification_latency(&self, latency_ms: f64) {
        if !self.is_enabled() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.latency_samples.push_back(latency_ms);
        if inner.latency_samples.len() > MAX_LATENCY_SAMPLES {
            inner.latency_samples.pop_front();
        }
        let sum: f64 = inner.latency_samples.iter().sum();
        inner.avg_notification_latency_ms = sum / inner.latency_samples.len() as f64;
        inner.total_notifications += 1;
    }

    /// Immutable snapshot of the six public counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        MetricsSnapshot {
            leadership_changes: inner.leadership_changes,
            write_conflicts: inner.write_conflicts,
            follower_refreshes: inner.follower_refreshes,
            total_notifications: inner.total_notifications,
            avg_notification_latency_ms: inner.avg_notification_latency_ms,
            start_timestamp: inner.start_timestamp,
        }
    }

    /// Zero every counter and restart the counting window.
    pub fn reset(&self) {
        *self.inner.lock() = MetricsInner::fresh();
    }

    /// Leadership changes per minute since the window started.
    #[must_use]
    pub fn leadership_changes_per_minute(&self) -> f64 {
        let inner = self.inner.lock();
        let elapsed_minutes = (now_ms() - inner.start_timestamp) / 60_000.0;
        if elapsed_minutes > 0.0 {
            inner.leadership_changes as f64 / elapsed_minutes
        } else {
            0.0
        }
    }
}

impl Default for CoordinationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
