//! The database handle.
//!
//! A [`Database`] owns exactly one block store, at most one open
//! transaction, zero or one coordination session, an optimistic write
//! queue, and a metrics instance. There is deliberately no process-wide
//! handle registry: callers own the `Database` value and pass it by
//! reference, and "multiple tabs" are multiple handles opened over the
//! same [`SharedStore`].
//!
//! Write ordering across handles is enforced at commit time. Reads are
//! always allowed; a commit carrying mutations while another session holds
//! the lease is rejected as a conflict and counted in metrics.

use std::path::PathBuf;
use std::sync::Arc;

use lagoon_coord::{
    CoordinationConfig, CoordinationMetrics, CoordinationService, CoordinationSubscription,
    OptimisticWriteQueue,
};
use lagoon_error::{LagoonError, Result};
use lagoon_store::{BlockStore, FileStore, LeaseStore, RawStore, SharedStore};
use lagoon_txn::TransactionManager;
use lagoon_types::{MetricsSnapshot, OptimisticWrite, QueryResult, Role, Row, Value};
use tracing::{debug, info};

use crate::cursor::CursorManager;
use crate::engine::QueryEngine;
use crate::statement::StatementManager;

/// Where a database persists its blocks.
pub enum Backend {
    /// One directory per database under `root`, one file per block.
    /// Single-process: no coordination session is created.
    Native { root: PathBuf },
    /// A shared in-process store, possibly opened by several handles
    /// concurrently. Opening joins the leader election.
    Shared(SharedStore),
}

/// Configuration for [`Database::open`].
pub struct OpenOptions {
    backend: Backend,
    passphrase: Option<String>,
    coordination: CoordinationConfig,
}

impl OpenOptions {
    /// Persist under `root` on the local filesystem.
    #[must_use]
    pub fn native(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Native { root: root.into() },
            passphrase: None,
            coordination: CoordinationConfig::default(),
        }
    }

    /// Persist in `store`, shared with any other handle holding it.
    #[must_use]
    pub fn shared(store: SharedStore) -> Self {
        Self {
            backend: Backend::Shared(store),
            passphrase: None,
            coordination: CoordinationConfig::default(),
        }
    }

    /// Encrypt payloads at rest under a key derived from `key`.
    #[must_use]
    pub fn passphrase(mut self, key: impl Into<String>) -> Self {
        self.passphrase = Some(key.into());
        self
    }

    /// Override election timing (heartbeat interval, lease duration).
    #[must_use]
    pub fn coordination(mut self, config: CoordinationConfig) -> Self {
        self.coordination = config;
        self
    }
}

/// An open database.
pub struct Database {
    name: String,
    store: Arc<BlockStore>,
    txn: TransactionManager,
    engine: Box<dyn QueryEngine>,
    cursors: CursorManager,
    statements: StatementManager,
    coordination: Option<CoordinationService>,
    optimistic: OptimisticWriteQueue,
    metrics: Arc<CoordinationMetrics>,
    closed: bool,
}

impl Database {
    /// Open (creating if necessary) the database `name` and join the
    /// election if the backend is shared.
    pub fn open(name: &str, options: OpenOptions, engine: Box<dyn QueryEngine>) -> Result<Self> {
        let (raw, lease): (Arc<dyn RawStore>, Option<Arc<dyn LeaseStore>>) =
            match options.backend {
                Backend::Native { root } => (Arc::new(FileStore::open(&root, name)?), None),
                Backend::Shared(shared) => {
                    let shared = Arc::new(shared);
                    (
                        Arc::clone(&shared) as Arc<dyn RawStore>,
                        Some(shared as Arc<dyn LeaseStore>),
                    )
                }
            };

        let store = Arc::new(BlockStore::open(raw, options.passphrase.as_deref())?);
        let metrics = Arc::new(CoordinationMetrics::new());

        let coordination = lease.map(|lease| {
            let mut session =
                CoordinationService::new(lease, Arc::clone(&metrics), options.coordination);
            // On demotion, re-read committed state so the local view
            // catches up with what the new leader committed.
            let committed = Arc::clone(&store);
            session.set_refresh_hook(move || {
                let _ = committed.read_metadata();
            });
            session.start();
            session
        });

        info!(
            target: "lagoon.core",
            name,
            coordinated = coordination.is_some(),
            encrypted = store.is_encrypted(),
            "database opened"
        );

        Ok(Self {
            name: name.to_owned(),
            txn: TransactionManager::new(Arc::clone(&store)),
            store,
            engine,
            cursors: CursorManager::new(),
            statements: StatementManager::new(),
            coordination,
            optimistic: OptimisticWriteQueue::new(),
            metrics,
            closed: false,
        })
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying block store.
    #[must_use]
    pub fn store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    /// The coordination session, when the backend is shared.
    #[must_use]
    pub fn coordination(&self) -> Option<&CoordinationService> {
        self.coordination.as_ref()
    }

    /// Whether this handle may currently commit. A native handle is always
    /// its own leader; a shared handle validates against the stored lease.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.coordination
            .as_ref()
            .map_or(true, CoordinationService::is_leader)
    }

    /// Cached role from the last heartbeat, if a session exists.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.coordination.as_ref().map(CoordinationService::role)
    }

    /// Subscribe to role-change notifications, if a session exists.
    pub fn subscribe_coordination(&self) -> Option<CoordinationSubscription> {
        self.coordination
            .as_ref()
            .map(CoordinationService::subscribe)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(LagoonError::DatabaseClosed);
        }
        Ok(())
    }

    /// Rejects store mutation while another session holds the lease.
    fn guard_writer(&self) -> Result<()> {
        if let Some(session) = &self.coordination {
            if !session.is_leader() {
                self.metrics.record_write_conflict();
                return Err(LagoonError::NotLeader {
                    leader: session.leader_id().unwrap_or_default(),
                });
            }
        }
        Ok(())
    }

    /// Commit gate: read-only commits pass freely, dirty commits require
    /// the lease.
    fn guard_commit(&self) -> Result<()> {
        if self.txn.is_dirty() {
            self.guard_writer()
        } else {
            Ok(())
        }
    }

    /// Store-wide maintenance must not run under an open transaction: a
    /// later commit would overwrite the replaced blocks with stale
    /// overlay bytes.
    fn guard_quiescent(&self) -> Result<()> {
        if self.txn.in_transaction() {
            return Err(LagoonError::TransactionOpen);
        }
        Ok(())
    }

    // === Statement execution ===

    /// Execute one statement. Outside an explicit transaction the
    /// statement runs in its own implicit one.
    pub fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        self.execute_with_params(sql, &[])
    }

    /// Execute one statement with positionally bound parameters.
    pub fn execute_with_params(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        if self.txn.in_transaction() {
            return self.engine.execute(&mut self.txn, sql, params);
        }

        self.txn.begin()?;
        match self.engine.execute(&mut self.txn, sql, params) {
            Ok(result) => {
                if let Err(e) = self.guard_commit().and_then(|()| self.txn.commit()) {
                    let _ = self.txn.rollback();
                    return Err(e);
                }
                Ok(result)
            }
            Err(e) => {
                let _ = self.txn.rollback();
                Err(e)
            }
        }
    }

    /// Execute several statements inside one implicit transaction: either
    /// all of them commit or none do.
    pub fn execute_batch(&mut self, statements: &[&str]) -> Result<Vec<QueryResult>> {
        self.ensure_open()?;
        if self.txn.in_transaction() {
            let mut results = Vec::with_capacity(statements.len());
            for sql in statements {
                results.push(self.engine.execute(&mut self.txn, sql, &[])?);
            }
            return Ok(results);
        }

        self.txn.begin()?;
        let mut results = Vec::with_capacity(statements.len());
        for sql in statements {
            match self.engine.execute(&mut self.txn, sql, &[]) {
                Ok(result) => results.push(result),
                Err(e) => {
                    let _ = self.txn.rollback();
                    return Err(e);
                }
            }
        }
        if let Err(e) = self.guard_commit().and_then(|()| self.txn.commit()) {
            let _ = self.txn.rollback();
            return Err(e);
        }
        debug!(target: "lagoon.core", statements = statements.len(), "batch committed");
        Ok(results)
    }

    // === Transactions ===

    /// Open an explicit transaction.
    pub fn begin_transaction(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.txn.begin()
    }

    /// Commit the open transaction. On failure the transaction stays open
    /// so the caller may retry or roll back.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.guard_commit()?;
        self.txn.commit()
    }

    /// Roll back the open transaction.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.txn.rollback()
    }

    /// Whether an explicit transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.txn.in_transaction()
    }

    /// Run `body` inside a transaction: commit on normal return, roll back
    /// and re-raise on error. An error raised by the body wins over any
    /// rollback error.
    pub fn transaction<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.ensure_open()?;
        self.begin_transaction()?;
        match body(self) {
            Ok(value) => match self.commit() {
                Ok(()) => Ok(value),
                Err(e) => {
                    let _ = self.txn.rollback();
                    Err(e)
                }
            },
            Err(e) => {
                let _ = self.rollback();
                Err(e)
            }
        }
    }

    // === Prepared statements ===

    /// Compile `sql` once for repeated execution.
    pub fn prepare_statement(&mut self, sql: &str) -> Result<u64> {
        self.ensure_open()?;
        let plan = self.engine.prepare(sql)?;
        Ok(self.statements.prepare(plan))
    }

    /// Execute a prepared statement with positionally bound parameters.
    /// Outside an explicit transaction it runs in its own implicit one.
    pub fn execute_statement(&mut self, handle: u64, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        if self.txn.in_transaction() {
            return self.statements.execute(handle, &mut self.txn, params);
        }

        self.txn.begin()?;
        match self.statements.execute(handle, &mut self.txn, params) {
            Ok(result) => {
                if let Err(e) = self.guard_commit().and_then(|()| self.txn.commit()) {
                    let _ = self.txn.rollback();
                    return Err(e);
                }
                Ok(result)
            }
            Err(e) => {
                let _ = self.txn.rollback();
                Err(e)
            }
        }
    }

    /// Release a prepared statement. Further use of the handle fails with
    /// `StatementNotFound`.
    pub fn finalize_statement(&mut self, handle: u64) -> Result<()> {
        self.ensure_open()?;
        self.statements.finalize(handle)
    }

    // === Streaming cursors ===

    /// Bind a query for incremental row delivery.
    pub fn prepare_stream(&mut self, sql: &str) -> Result<u64> {
        self.ensure_open()?;
        let cursor = self.engine.open_cursor(&mut self.txn, sql)?;
        Ok(self.cursors.open(cursor))
    }

    /// Fetch up to `batch_size` rows; an empty batch signals exhaustion,
    /// and fetching again after exhaustion stays empty.
    pub fn fetch_next(&mut self, handle: u64, batch_size: usize) -> Result<Vec<Row>> {
        self.ensure_open()?;
        self.cursors.fetch_next(handle, batch_size)
    }

    /// Release a stream. Closing the same handle twice is a protocol error.
    pub fn close_stream(&mut self, handle: u64) -> Result<()> {
        self.ensure_open()?;
        self.cursors.close(handle)
    }

    // === Snapshots and rekey ===

    /// Serialize the committed store into one artifact at `path`. An open
    /// transaction's overlay is never included.
    pub fn export_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        self.ensure_open()?;
        self.store.export_to_file(path.as_ref())
    }

    /// Atomically replace this database's contents with the artifact at
    /// `path`. A malformed artifact leaves the database untouched.
    /// Rejected while a transaction is open.
    pub fn import_from_file(&mut self, path: impl AsRef<std::path::Path>) -> Result<()> {
        self.ensure_open()?;
        self.guard_quiescent()?;
        self.guard_writer()?;
        self.store.import_from_file(path.as_ref())
    }

    /// Re-encrypt every block under `new_key`, all-or-nothing. Rejected
    /// while a transaction is open.
    pub fn rekey(&mut self, new_key: &str) -> Result<()> {
        self.ensure_open()?;
        self.guard_quiescent()?;
        self.guard_writer()?;
        self.store.rekey(new_key)
    }

    // === Optimistic writes ===

    /// Toggle optimistic-update mode. Existing entries are kept.
    pub fn enable_optimistic_updates(&self, enabled: bool) {
        self.optimistic.set_enabled(enabled);
    }

    /// Track a not-yet-acknowledged write; returns its id.
    pub fn track_optimistic_write(&self, sql: &str) -> u64 {
        self.optimistic.track(sql)
    }

    /// Mark a tracked write as acknowledged.
    pub fn confirm_optimistic_write(&self, id: u64) {
        self.optimistic.confirm(id);
    }

    /// Mark a tracked write as failed.
    pub fn fail_optimistic_write(&self, id: u64) {
        self.optimistic.fail(id);
    }

    /// Number of tracked writes still pending.
    #[must_use]
    pub fn get_pending_writes_count(&self) -> usize {
        self.optimistic.pending_count()
    }

    /// Snapshot of every tracked write, in tracking order.
    #[must_use]
    pub fn optimistic_writes(&self) -> Vec<OptimisticWrite> {
        self.optimistic.entries()
    }

    /// Empty the optimistic queue.
    pub fn clear_optimistic_writes(&self) {
        self.optimistic.clear();
    }

    // === Coordination metrics ===

    /// Toggle metrics collection. Disabling resets the counters.
    pub fn enable_coordination_metrics(&self, enabled: bool) {
        self.metrics.set_enabled(enabled);
    }

    /// Immutable snapshot of the coordination counters.
    #[must_use]
    pub fn coordination_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Zero every counter and restart the counting window.
    pub fn reset_coordination_metrics(&self) {
        self.metrics.reset();
    }

    /// The shared metrics instance (also fed by the heartbeat thread).
    #[must_use]
    pub fn metrics(&self) -> &Arc<CoordinationMetrics> {
        &self.metrics
    }

    /// Close the handle: roll back any open transaction, drop live cursors
    /// and statements, and leave the election (releasing the lease).
    /// Idempotent; any further operation fails with `DatabaseClosed`.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if self.txn.in_transaction() {
            let _ = self.txn.rollback();
        }
        self.cursors.close_all();
        self.statements.finalize_all();
        if let Some(mut session) = self.coordination.take() {
            session.stop();
        }
        self.closed = true;
        info!(target: "lagoon.core", name = %self.name, "database closed");
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("closed", &self.closed)
            .field("in_transaction", &self.txn.in_transaction())
            .field("coordinated", &self.coordination.is_some())
            .finish_non_exhaustive()
    }
}
