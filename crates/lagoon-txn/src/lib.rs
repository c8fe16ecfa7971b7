//! Transaction layer: an in-memory write-set overlay over the block store.
//!
//! State machine: `Idle → InTransaction → {Committing → Idle,
//! RollingBack → Idle}`. While a transaction is open, reads consult the
//! overlay first and fall back to committed store state, so a transaction
//! always reads its own writes. Commit applies the overlay as one atomic
//! [`WriteBatch`]; on backend failure the transaction stays open so the
//! caller can retry or roll back. Rollback discards the overlay with no
//! backend I/O.

use std::collections::BTreeMap;
use std::sync::Arc;

use lagoon_error::{LagoonError, Result};
use lagoon_store::{BlockStore, WriteBatch};
use lagoon_types::BlockId;
use tracing::debug;

/// Buffers mutations in memory and commits or rolls them back atomically.
pub struct TransactionManager {
    store: Arc<BlockStore>,
    /// `None` while idle. Inside the overlay, `Some(bytes)` is a pending
    /// write and `None` a pending delete.
    overlay: Option<BTreeMap<BlockId, Option<Vec<u8>>>>,
}

impl TransactionManager {
    /// Create an idle manager over `store`.
    #[must_use]
    pub fn new(store: Arc<BlockStore>) -> Self {
        Self {
            store,
            overlay: None,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    /// Whether a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.overlay.is_some()
    }

    /// Whether the open transaction holds any pending mutations.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.overlay.as_ref().is_some_and(|o| !o.is_empty())
    }

    /// Open a transaction. Nested `begin` is a protocol error.
    pub fn begin(&mut self) -> Result<()> {
        if self.overlay.is_some() {
            return Err(LagoonError::NestedTransaction);
        }
        self.overlay = Some(BTreeMap::new());
        debug!(target: "lagoon.txn", "transaction begin");
        Ok(())
    }

    /// Read a block, seeing this transaction's own writes first.
    pub fn read_block(&self, id: BlockId) -> Result<Vec<u8>> {
        if let Some(overlay) = &self.overlay {
            match overlay.get(&id) {
                Some(Some(bytes)) => return Ok(bytes.clone()),
                Some(None) => return Err(LagoonError::BlockNotFound { id: id.get() }),
                None => {}
            }
        }
        self.store.read_block(id)
    }

    /// Buffer a block write. Outside a transaction the write is applied to
    /// the store immediately as a single-block batch.
    pub fn write_block(&mut self, id: BlockId, bytes: Vec<u8>) -> Result<()> {
        match &mut self.overlay {
            Some(overlay) => {
                overlay.insert(id, Some(bytes));
                Ok(())
            }
            None => {
                let mut batch = WriteBatch::default();
                batch.writes.insert(id, bytes);
                self.store.write_blocks(batch)
            }
        }
    }

    /// Buffer a block delete (or apply it immediately outside a transaction).
    pub fn delete_block(&mut self, id: BlockId) -> Result<()> {
        match &mut self.overlay {
            Some(overlay) => {
                overlay.insert(id, None);
                Ok(())
            }
            None => self.store.delete_block(id),
        }
    }

    /// Apply the overlay to the store as one atomic batch.
    ///
    /// On success the overlay is discarded and the manager returns to idle.
    /// On backend failure the transaction remains open.
    pub fn commit(&mut self) -> Result<()> {
        let overlay = self
            .overlay
            .as_ref()
            .ok_or(LagoonError::NoActiveTransaction)?;

        let mut batch = WriteBatch::default();
        for (&id, entry) in overlay {
            match entry {
                Some(bytes) => {
                    batch.writes.insert(id, bytes.clone());
                }
                None => {
                    batch.deletes.insert(id);
                }
            }
        }

        self.store.write_blocks(batch)?;
        let applied = self.overlay.take().map_or(0, |o| o.len());
        debug!(target: "lagoon.txn", entries = applied, "transaction committed");
        Ok(())
    }

    /// Discard the overlay unconditionally. No backend I/O.
    pub fn rollback(&mut self) -> Result<()> {
        let overlay = self
            .overlay
            .take()
            .ok_or(LagoonError::NoActiveTransaction)?;
        debug!(target: "lagoon.txn", discarded = overlay.len(), "transaction rolled back");
        Ok(())
    }

    /// Run `body` inside a transaction: commit on normal return, roll back
    /// and re-raise on any error thrown inside the body.
    pub fn with_transaction<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.begin()?;
        match body(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                // The body's error wins even if rollback itself fails.
                let _ = self.rollback();
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}
