//! Multi-handle coordination over one shared store: election, write
//! gating, optimistic tracking, and the metrics contract.

use std::time::Duration;

use lagoon::{
    CoordinationConfig, Database, LagoonError, OpenOptions, Role, SharedStore, Value,
};
use lagoon_harness::TableEngine;

fn fast() -> CoordinationConfig {
    CoordinationConfig {
        heartbeat_interval: Duration::from_millis(10),
        lease_duration_ms: 250.0,
    }
}

fn open_handle(store: &SharedStore) -> Database {
    Database::open(
        "app",
        OpenOptions::shared(store.clone()).coordination(fast()),
        TableEngine::boxed(),
    )
    .unwrap()
}

fn wait_for_leadership(db: &Database) {
    for _ in 0..400 {
        db.coordination().unwrap().try_tick();
        if db.is_leader() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("no leader elected within the test window");
}

#[test]
fn first_handle_leads_later_handles_follow() {
    let store = SharedStore::new("app");
    let leader = open_handle(&store);
    assert!(leader.is_leader());
    assert_eq!(leader.role(), Some(Role::Leader));

    let follower = open_handle(&store);
    assert_eq!(follower.role(), Some(Role::Follower));
    assert!(!follower.is_leader());
}

#[test]
fn only_the_leader_commits() {
    let store = SharedStore::new("app");
    let mut leader = open_handle(&store);
    let mut follower = open_handle(&store);
    follower.enable_coordination_metrics(true);

    leader.execute("CREATE TABLE t (n)").unwrap();
    leader.execute("INSERT INTO t VALUES (1)").unwrap();

    // The follower reads freely but cannot commit a mutation.
    let read = follower.execute("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(read.rows[0].get(0), Some(&Value::Integer(1)));

    let err = follower.execute("INSERT INTO t VALUES (2)").unwrap_err();
    assert!(matches!(err, LagoonError::NotLeader { .. }));
    assert_eq!(follower.coordination_metrics().write_conflicts, 1);

    // The rejected write never reached the store.
    let count = leader.execute("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(count.rows[0].get(0), Some(&Value::Integer(1)));
}

#[test]
fn closing_the_leader_hands_off() {
    let store = SharedStore::new("app");
    let mut first = open_handle(&store);
    first.execute("CREATE TABLE t (n)").unwrap();

    let mut second = open_handle(&store);
    assert_eq!(second.role(), Some(Role::Follower));

    first.close();
    wait_for_leadership(&second);
    second.execute("INSERT INTO t VALUES (1)").unwrap();
}

#[test]
fn forced_takeover_deposes_the_leader() {
    let store = SharedStore::new("app");
    let old = open_handle(&store);
    let new = open_handle(&store);
    assert_eq!(new.role(), Some(Role::Follower));

    new.coordination().unwrap().force_become_leader().unwrap();
    assert!(new.is_leader());
    // The deposed leader notices on its next heartbeat; the validated
    // probe answers immediately.
    assert!(!old.is_leader());
}

#[test]
fn role_changes_are_broadcast_to_subscribers() {
    let store = SharedStore::new("app");
    let leader = open_handle(&store);
    let follower = open_handle(&store);
    let events = follower.subscribe_coordination().unwrap();

    follower
        .coordination()
        .unwrap()
        .force_become_leader()
        .unwrap();
    // Fold the new lease into local state.
    follower.coordination().unwrap().try_tick();

    let event = events
        .recv_timeout(Duration::from_secs(2))
        .expect("no promotion event");
    assert!(event.became_leader);
    assert_eq!(
        event.leader.as_deref(),
        Some(follower.coordination().unwrap().session_id())
    );
    drop(leader);
}

#[test]
fn optimistic_queue_counts_and_clears() {
    let store = SharedStore::new("app");
    let db = open_handle(&store);
    db.enable_optimistic_updates(true);

    let ids: Vec<u64> = (0..4)
        .map(|i| db.track_optimistic_write(&format!("INSERT INTO t VALUES ({i})")))
        .collect();
    assert_eq!(db.get_pending_writes_count(), 4);

    db.confirm_optimistic_write(ids[0]);
    db.fail_optimistic_write(ids[1]);
    assert_eq!(db.get_pending_writes_count(), 2);

    db.clear_optimistic_writes();
    assert_eq!(db.get_pending_writes_count(), 0);
}

#[test]
fn metrics_snapshot_matches_the_contract() {
    let store = SharedStore::new("app");
    let db = open_handle(&store);
    db.enable_coordination_metrics(true);

    for ms in [10.5, 15.2, 12.8] {
        db.metrics().record_notification_latency(ms);
    }
    let snap = db.coordination_metrics();
    assert_eq!(snap.total_notifications, 3);
    assert!((snap.avg_notification_latency_ms - 12.833_333).abs() < 1e-2);

    db.reset_coordination_metrics();
    let snap = db.coordination_metrics();
    assert_eq!(snap.total_notifications, 0);
    assert_eq!(snap.leadership_changes, 0);
}

#[test]
fn commits_by_the_leader_are_visible_to_followers() {
    let store = SharedStore::new("app");
    let mut leader = open_handle(&store);
    let mut follower = open_handle(&store);

    leader.execute("CREATE TABLE log (msg)").unwrap();
    leader.transaction(|db| {
        db.execute("INSERT INTO log VALUES ('a')")?;
        db.execute("INSERT INTO log VALUES ('b')")?;
        Ok(())
    })
    .unwrap();

    let rows = follower.execute("SELECT * FROM log").unwrap().rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get(0).unwrap().as_text(), Some("b"));
}
