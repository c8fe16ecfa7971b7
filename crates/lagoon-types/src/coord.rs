//! Types shared by the multi-handle coordination protocol.

/// Role of a coordination session in the per-store election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Session has joined but has not yet observed or claimed a lease.
    #[default]
    Candidate,
    /// Another session holds the lease; this one must not commit.
    Follower,
    /// This session holds the unexpired lease and may commit.
    Leader,
}

impl Role {
    /// Only the leader may drive commits against the shared store.
    #[must_use]
    pub const fn may_commit(self) -> bool {
        matches!(self, Self::Leader)
    }
}

/// The shared lease record arbitrating write rights.
///
/// Stored as a single atomically-swappable record in the shared backend.
/// The current leader is whichever session holds the unexpired lease with
/// the highest term.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LeaseRecord {
    /// Session that holds the lease.
    pub holder: String,
    /// Election term; a higher term always supersedes a lower one.
    pub term: u64,
    /// Wall-clock expiry in milliseconds since the Unix epoch.
    pub expires_at_ms: f64,
}

impl LeaseRecord {
    /// Whether the lease has lapsed at `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: f64) -> bool {
        now_ms > self.expires_at_ms
    }
}

/// Immutable snapshot of the coordination counters.
///
/// This is the exact six-field contract returned to callers; the running
/// latency window behind `avg_notification_latency_ms` is internal.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    /// Total role changes observed (in either direction).
    pub leadership_changes: u64,
    /// Writes rejected because the session was not the leader.
    pub write_conflicts: u64,
    /// Times a follower re-read committed state after a leadership change.
    pub follower_refreshes: u64,
    /// Notifications delivered to local subscribers.
    pub total_notifications: u64,
    /// Running arithmetic mean of notification delivery latency.
    pub avg_notification_latency_ms: f64,
    /// When the current counting window started, in epoch milliseconds.
    pub start_timestamp: f64,
}

/// Lifecycle of a locally-tracked, not-yet-acknowledged write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OptimisticStatus {
    /// Not yet durably acknowledged.
    Pending,
    /// Acknowledged by the leader.
    Confirmed,
    /// Rejected (conflict or execution error).
    Failed,
}

/// One entry in the optimistic write queue.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OptimisticWrite {
    /// Monotonically increasing id, unique within the owning handle.
    pub id: u64,
    /// The tracked SQL text.
    pub sql: String,
    /// Epoch milliseconds at tracking time.
    pub created_at: f64,
    /// Current lifecycle state.
    pub status: OptimisticStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_leader_may_commit() {
        assert!(Role::Leader.may_commit());
        assert!(!Role::Follower.may_commit());
        assert!(!Role::Candidate.may_commit());
        assert_eq!(Role::default(), Role::Candidate);
    }

    #[test]
    fn lease_expiry() {
        let lease = LeaseRecord {
            holder: "tab-1".to_owned(),
            term: 3,
            expires_at_ms: 1000.0,
        };
        assert!(!lease.is_expired(999.0));
        assert!(!lease.is_expired(1000.0));
        assert!(lease.is_expired(1000.1));
    }

    #[test]
    fn metrics_snapshot_serializes_six_fields() {
        let snap = MetricsSnapshot {
            leadership_changes: 1,
            write_conflicts: 2,
            follower_refreshes: 3,
            total_notifications: 4,
            avg_notification_latency_ms: 5.5,
            start_timestamp: 6.0,
        };
        let json = serde_json::to_value(&snap).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 6);
        assert_eq!(obj["write_conflicts"], 2);
        assert_eq!(obj["avg_notification_latency_ms"], 5.5);
    }
}
