//! Shared in-process backend.
//!
//! The Rust rendition of a browser tab's shared persistent object store:
//! one [`SharedStore`] object per logical database name, opened concurrently
//! by several `Database` handles ("tabs"). A batch is applied inside one
//! critical section, so partial application is impossible by construction,
//! and the same object carries the lease record with a true compare-and-swap
//! for the election protocol.
//!
//! There is deliberately no process-global registry: the store object is an
//! explicit value passed to each handle that opens it.

use std::collections::HashMap;
use std::sync::Arc;

use lagoon_error::{LagoonError, Result};
use lagoon_types::{BlockId, LeaseRecord, Namespace, StoreMetadata};
use parking_lot::Mutex;
use tracing::debug;

use crate::traits::{LeaseStore, RawBatch, RawStore};

#[derive(Debug, Default)]
struct SharedInner {
    ns_a: HashMap<BlockId, Vec<u8>>,
    ns_b: HashMap<BlockId, Vec<u8>>,
    metadata: StoreMetadata,
    lease: Option<LeaseRecord>,
}

impl SharedInner {
    fn namespace(&self, ns: Namespace) -> &HashMap<BlockId, Vec<u8>> {
        match ns {
            Namespace::A => &self.ns_a,
            Namespace::B => &self.ns_b,
        }
    }

    fn namespace_mut(&mut self, ns: Namespace) -> &mut HashMap<BlockId, Vec<u8>> {
        match ns {
            Namespace::A => &mut self.ns_a,
            Namespace::B => &mut self.ns_b,
        }
    }
}

/// Shared-memory raw store, cloneable across handles.
#[derive(Debug, Clone)]
pub struct SharedStore {
    name: Arc<str>,
    inner: Arc<Mutex<SharedInner>>,
}

impl SharedStore {
    /// Create an empty shared store for `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            inner: Arc::new(Mutex::new(SharedInner {
                metadata: StoreMetadata::new(),
                ..SharedInner::default()
            })),
        }
    }
}

impl RawStore for SharedStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, ns: Namespace, id: BlockId) -> Result<Vec<u8>> {
        self.inner
            .lock()
            .namespace(ns)
            .get(&id)
            .cloned()
            .ok_or(LagoonError::BlockNotFound { id: id.get() })
    }

    fn apply(&self, ns: Namespace, batch: RawBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        // One critical section per batch: either every mutation below lands
        // or (on the error-free path there is no early exit) none do.
        let mut inner = self.inner.lock();
        let space = inner.namespace_mut(ns);
        for (id, bytes) in batch.writes {
            space.insert(id, bytes);
        }
        for id in &batch.deletes {
            space.remove(id);
        }
        if let Some(meta) = batch.metadata {
            inner.metadata = meta;
        }
        debug!(target: "lagoon.store", name = %self.name, "applied shared batch");
        Ok(())
    }

    fn list(&self, ns: Namespace) -> Result<Vec<BlockId>> {
        let inner = self.inner.lock();
        let mut ids: Vec<BlockId> = inner.namespace(ns).keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn read_metadata(&self) -> Result<StoreMetadata> {
        Ok(self.inner.lock().metadata.clone())
    }

    fn clear_namespace(&self, ns: Namespace) -> Result<()> {
        self.inner.lock().namespace_mut(ns).clear();
        Ok(())
    }
}

impl LeaseStore for SharedStore {
    fn load_lease(&self) -> Result<Option<LeaseRecord>> {
        Ok(self.inner.lock().lease.clone())
    }

    fn try_swap_lease(
        &self,
        expected: Option<&LeaseRecord>,
        next: Option<LeaseRecord>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.lease.as_ref() != expected {
            return Ok(false);
        }
        debug!(
            target: "lagoon.store",
            name = %self.name,
            claimed = next.is_some(),
            term = next.as_ref().map_or(0, |l| l.term),
            "lease swap"
        );
        inner.lease = next;
        Ok(true)
    }
}
