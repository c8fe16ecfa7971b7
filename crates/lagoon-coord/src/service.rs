//! Leader election over the shared lease record.
//!
//! One session per database handle on the shared backend. Sessions renew or
//! claim the lease on a fixed heartbeat; the current leader is whichever
//! session holds the unexpired lease with the highest term, and election
//! races are settled by the lease store's compare-and-swap.
//!
//! The heartbeat is a dedicated thread that sleeps between ticks rather
//! than a re-entrant timer callback, and every tick entry point passes
//! through an atomic in-flight flag: if a tick is still running when the
//! next firing arrives, that firing is skipped, not queued. The flag is
//! cleared when the in-flight tick completes, success or failure. Tick
//! errors are converted into log signals and never escape the scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lagoon_error::Result;
use lagoon_store::LeaseStore;
use lagoon_types::{now_ms, LeaseRecord, Role};
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::metrics::CoordinationMetrics;

/// Tunables for the election protocol.
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// How often the heartbeat fires.
    pub heartbeat_interval: Duration,
    /// How long a lease stays valid after each renewal.
    pub lease_duration_ms: f64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            lease_duration_ms: 5_000.0,
        }
    }
}

/// Broadcast to local subscribers on every role change.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinationEvent {
    /// Session that now holds the lease, if any.
    pub leader: Option<String>,
    /// Term of the lease that caused the change.
    pub term: u64,
    /// Whether the emitting session became the leader.
    pub became_leader: bool,
}

/// An event paired with the instant its broadcast began.
struct Delivery {
    event: CoordinationEvent,
    emitted_at: Instant,
}

/// Receiving end of a role-change subscription.
///
/// Notification latency is measured end to end: the emitting tick stamps
/// each event at broadcast and the elapsed time is recorded against the
/// session's metrics when the subscriber actually receives it.
pub struct CoordinationSubscription {
    rx: mpsc::Receiver<Delivery>,
    metrics: Arc<CoordinationMetrics>,
}

impl CoordinationSubscription {
    /// Receive the next event without blocking.
    pub fn try_recv(&self) -> Option<CoordinationEvent> {
        self.rx.try_recv().ok().map(|d| self.record(d))
    }

    /// Block up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<CoordinationEvent> {
        self.rx.recv_timeout(timeout).ok().map(|d| self.record(d))
    }

    fn record(&self, delivery: Delivery) -> CoordinationEvent {
        self.metrics
            .record_notification_latency(delivery.emitted_at.elapsed().as_secs_f64() * 1000.0);
        delivery.event
    }
}

impl std::fmt::Debug for CoordinationSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationSubscription").finish_non_exhaustive()
    }
}

/// Outcome of one heartbeat firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick ran to completion (possibly logging an internal error).
    Completed,
    /// A previous tick was still in flight; this firing was dropped.
    Skipped,
}

#[derive(Debug)]
struct SessionState {
    role: Role,
    term: u64,
    leader_id: Option<String>,
    lease_expiry_ms: f64,
}

struct SessionInner {
    session_id: String,
    store: Arc<dyn LeaseStore>,
    config: CoordinationConfig,
    state: Mutex<SessionState>,
    tick_in_flight: AtomicBool,
    stop: Mutex<bool>,
    stop_signal: Condvar,
    metrics: Arc<CoordinationMetrics>,
    subscribers: Mutex<Vec<mpsc::Sender<Delivery>>>,
    refresh_hook: Mutex<Option<Box<dyn Fn() + Send>>>,
}

/// One handle's coordination session.
pub struct CoordinationService {
    inner: Arc<SessionInner>,
    heartbeat: Option<thread::JoinHandle<()>>,
}

/// Clears the in-flight flag when the tick scope exits, even on panic.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CoordinationService {
    /// Create a session over `store` without starting the heartbeat.
    #[must_use]
    pub fn new(
        store: Arc<dyn LeaseStore>,
        metrics: Arc<CoordinationMetrics>,
        config: CoordinationConfig,
    ) -> Self {
        // Timestamp plus a random suffix: unique and roughly orderable.
        let session_id = format!(
            "{:013x}-{:04x}",
            now_ms() as u64,
            rand::thread_rng().gen::<u16>()
        );
        debug!(target: "lagoon.coord", session = %session_id, "created coordination session");

        Self {
            inner: Arc::new(SessionInner {
                session_id,
                store,
                config,
                state: Mutex::new(SessionState {
                    role: Role::Candidate,
                    term: 0,
                    leader_id: None,
                    lease_expiry_ms: 0.0,
                }),
                tick_in_flight: AtomicBool::new(false),
                stop: Mutex::new(false),
                stop_signal: Condvar::new(),
                metrics,
                subscribers: Mutex::new(Vec::new()),
                refresh_hook: Mutex::new(None),
            }),
            heartbeat: None,
        }
    }

    /// Unique id of this session.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Current role, as of the last tick.
    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.state.lock().role
    }

    /// Current term, as of the last tick.
    #[must_use]
    pub fn term(&self) -> u64 {
        self.inner.state.lock().term
    }

    /// Session id of the current leader, if one is known.
    #[must_use]
    pub fn leader_id(&self) -> Option<String> {
        self.inner.state.lock().leader_id.clone()
    }

    /// Install the follower-refresh hook, run whenever this session is
    /// demoted so it re-reads committed store state into any local cache.
    pub fn set_refresh_hook(&self, hook: impl Fn() + Send + 'static) {
        *self.inner.refresh_hook.lock() = Some(Box::new(hook));
    }

    /// Subscribe to role-change notifications.
    pub fn subscribe(&self) -> CoordinationSubscription {
        let (tx, rx) = mpsc::channel();
        self.inner.subscribers.lock().push(tx);
        CoordinationSubscription {
            rx,
            metrics: Arc::clone(&self.inner.metrics),
        }
    }

    /// Join the election: run one synchronous tick, then start the
    /// heartbeat thread.
    pub fn start(&mut self) {
        self.inner.try_tick();
        if self.heartbeat.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let interval = inner.config.heartbeat_interval;
        let spawned = thread::Builder::new()
            .name(format!("lagoon-heartbeat-{}", inner.session_id))
            .spawn(move || loop {
                {
                    let mut stop = inner.stop.lock();
                    if !*stop {
                        inner.stop_signal.wait_for(&mut stop, interval);
                    }
                    if *stop {
                        break;
                    }
                }
                inner.try_tick();
            });
        match spawned {
            Ok(handle) => self.heartbeat = Some(handle),
            // The session still works via manual ticks; it just stops
            // renewing on its own.
            Err(e) => {
                warn!(target: "lagoon.coord", error = %e, "failed to spawn heartbeat thread")
            }
        }
    }

    /// Run one heartbeat firing through the reentrancy guard.
    ///
    /// Exposed so tests (and embedders without a background thread) can
    /// drive the protocol manually; the heartbeat thread uses the same
    /// entry point.
    pub fn try_tick(&self) -> TickOutcome {
        self.inner.try_tick()
    }

    /// Validated leadership check: trusts the stored lease, not the cached
    /// role, so a deposed leader answers `false` as soon as a higher-term
    /// lease lands.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        match self.inner.store.load_lease() {
            Ok(Some(lease)) => {
                lease.holder == self.inner.session_id && !lease.is_expired(now_ms())
            }
            Ok(None) => false,
            Err(e) => {
                warn!(target: "lagoon.coord", error = %e, "lease read failed in leadership check");
                false
            }
        }
    }

    /// Claim leadership regardless of any live lease (operator takeover).
    pub fn force_become_leader(&self) -> Result<()> {
        loop {
            let current = self.inner.store.load_lease()?;
            let term = current.as_ref().map_or(1, |l| l.term + 1);
            let claim = LeaseRecord {
                holder: self.inner.session_id.clone(),
                term,
                expires_at_ms: now_ms() + self.inner.config.lease_duration_ms,
            };
            if self
                .inner
                .store
                .try_swap_lease(current.as_ref(), Some(claim.clone()))?
            {
                info!(
                    target: "lagoon.coord",
                    session = %self.inner.session_id,
                    term,
                    "forced leadership takeover"
                );
                self.inner.observe_lease(&claim);
                return Ok(());
            }
            // Lost a swap race; re-read and try again.
        }
    }

    /// Leave the election: stop the heartbeat and explicitly release the
    /// lease if we hold it, so a successor does not wait out the expiry.
    pub fn stop(&mut self) {
        {
            let mut stop = self.inner.stop.lock();
            if *stop {
                return;
            }
            *stop = true;
        }
        self.inner.stop_signal.notify_all();
        if let Some(handle) = self.heartbeat.take() {
            let _ = handle.join();
        }

        match self.inner.store.load_lease() {
            Ok(Some(lease)) if lease.holder == self.inner.session_id => {
                match self.inner.store.try_swap_lease(Some(&lease), None) {
                    Ok(true) => {
                        info!(
                            target: "lagoon.coord",
                            session = %self.inner.session_id,
                            "released lease on close"
                        )
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(target: "lagoon.coord", error = %e, "lease release failed on close")
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(target: "lagoon.coord", error = %e, "lease read failed on close"),
        }

        let mut state = self.inner.state.lock();
        state.role = Role::Candidate;
        state.leader_id = None;
    }
}

impl Drop for CoordinationService {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CoordinationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationService")
            .field("session_id", &self.inner.session_id)
            .field("role", &self.role())
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    fn try_tick(&self) -> TickOutcome {
        // At most one tick in flight: a firing that lands while another
        // tick runs is dropped, never queued.
        if self.tick_in_flight.swap(true, Ordering::SeqCst) {
            debug!(target: "lagoon.coord", session = %self.session_id, "heartbeat skipped, tick in flight");
            return TickOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.tick_in_flight);

        if let Err(e) = self.tick() {
            // A failed tick must not kill the coordination loop.
            warn!(target: "lagoon.coord", session = %self.session_id, error = %e, "heartbeat tick failed");
        }
        TickOutcome::Completed
    }

    fn tick(&self) -> Result<()> {
        let now = now_ms();
        let lease = self.store.load_lease()?;

        match lease {
            // Our lease: renew it (same term, fresh expiry).
            Some(current) if current.holder == self.session_id => {
                let renewed = LeaseRecord {
                    holder: self.session_id.clone(),
                    term: current.term,
                    expires_at_ms: now + self.config.lease_duration_ms,
                };
                if self.store.try_swap_lease(Some(&current), Some(renewed.clone()))? {
                    self.observe_lease(&renewed);
                } else if let Some(winner) = self.store.load_lease()? {
                    // Someone replaced our lease between read and swap.
                    self.observe_lease(&winner);
                }
            }
            // A live lease held by someone else: follow it.
            Some(current) if !current.is_expired(now) => {
                self.observe_lease(&current);
            }
            // Absent or expired: claim with an incremented term.
            current => {
                let term = current.as_ref().map_or(1, |l| l.term + 1);
                let claim = LeaseRecord {
                    holder: self.session_id.clone(),
                    term,
                    expires_at_ms: now + self.config.lease_duration_ms,
                };
                if self.store.try_swap_lease(current.as_ref(), Some(claim.clone()))? {
                    self.observe_lease(&claim);
                } else if let Some(winner) = self.store.load_lease()? {
                    // Exactly one competing claim is accepted; we lost.
                    self.observe_lease(&winner);
                }
            }
        }
        Ok(())
    }

    /// Fold an observed lease into session state, driving role transitions.
    fn observe_lease(&self, lease: &LeaseRecord) {
        let we_hold_it = lease.holder == self.session_id;
        let new_role = if we_hold_it {
            Role::Leader
        } else {
            Role::Follower
        };

        let old_role = {
            let mut state = self.state.lock();
            let old = state.role;
            state.role = new_role;
            state.term = lease.term;
            state.leader_id = Some(lease.holder.clone());
            state.lease_expiry_ms = lease.expires_at_ms;
            old
        };

        if old_role == new_role {
            return;
        }

        info!(
            target: "lagoon.coord",
            session = %self.session_id,
            ?old_role,
            ?new_role,
            term = lease.term,
            "role transition"
        );
        self.metrics.record_leadership_change(we_hold_it);

        if new_role == Role::Follower {
            // Re-read committed state so our local view catches up with
            // whatever the new leader committed.
            if let Some(hook) = &*self.refresh_hook.lock() {
                hook();
            }
            self.metrics.record_follower_refresh();
        }

        self.notify(CoordinationEvent {
            leader: Some(lease.holder.clone()),
            term: lease.term,
            became_leader: we_hold_it,
        });
    }

    /// Broadcast to local subscribers, pruning those whose receiver is
    /// gone. Latency is recorded on the receiving side, against the
    /// timestamp taken here.
    fn notify(&self, event: CoordinationEvent) {
        let emitted_at = Instant::now();
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| {
            tx.send(Delivery {
                event: event.clone(),
                emitted_at,
            })
            .is_ok()
        });
    }
}
