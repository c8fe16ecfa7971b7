//! Backend trait surface.
//!
//! A backend stores raw (post-encryption) block payloads plus the metadata
//! descriptor, and guarantees that one [`RawBatch`] is applied all-or-nothing.
//! Everything above the trait (encryption, checksums, rekey, snapshots)
//! lives in [`crate::BlockStore`] and is backend-agnostic.

use std::collections::{BTreeMap, BTreeSet};

use lagoon_error::Result;
use lagoon_types::{BlockId, LeaseRecord, Namespace, StoreMetadata};

/// One atomic unit of backend mutation.
///
/// Writes and deletes target a single namespace; the metadata descriptor,
/// when present, commits in the same unit. A reader never observes a
/// partially-applied batch.
#[derive(Debug, Default, Clone)]
pub struct RawBatch {
    /// Block payloads to write (already encrypted if encryption is on).
    pub writes: BTreeMap<BlockId, Vec<u8>>,
    /// Block ids to remove.
    pub deletes: BTreeSet<BlockId>,
    /// Descriptor to commit with the batch. `None` leaves metadata untouched.
    pub metadata: Option<StoreMetadata>,
}

impl RawBatch {
    /// A batch that only commits a new descriptor.
    #[must_use]
    pub fn metadata_only(meta: StoreMetadata) -> Self {
        Self {
            metadata: Some(meta),
            ..Self::default()
        }
    }

    /// True when the batch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty() && self.metadata.is_none()
    }
}

/// Raw durable storage with atomic batch application.
///
/// Implemented by [`crate::FileStore`] (native filesystem) and
/// [`crate::SharedStore`] (shared in-process object store). This trait is
/// open: embedders may supply their own backend.
pub trait RawStore: Send + Sync {
    /// Diagnostic name of the backing store (database name or path).
    fn name(&self) -> &str;

    /// Read one block's stored payload.
    ///
    /// Fails with `BlockNotFound` for ids never written (or deleted) in the
    /// given namespace.
    fn read(&self, ns: Namespace, id: BlockId) -> Result<Vec<u8>>;

    /// Apply a batch all-or-nothing.
    fn apply(&self, ns: Namespace, batch: RawBatch) -> Result<()>;

    /// List all block ids present in a namespace, in ascending order.
    fn list(&self, ns: Namespace) -> Result<Vec<BlockId>>;

    /// Read the current descriptor.
    fn read_metadata(&self) -> Result<StoreMetadata>;

    /// Drop every block in a namespace. Used to reclaim the inactive
    /// namespace after a rekey/import flip; never called on the active one.
    fn clear_namespace(&self, ns: Namespace) -> Result<()>;
}

/// Atomic access to the shared lease record.
///
/// Only backends that can be opened by several handles at once carry a
/// lease; the election protocol relies on `try_swap_lease` being a true
/// compare-and-swap so that exactly one competing claim is accepted.
pub trait LeaseStore: Send + Sync {
    /// Read the current lease record, if any.
    fn load_lease(&self) -> Result<Option<LeaseRecord>>;

    /// Replace the lease iff it currently equals `expected`.
    ///
    /// `next = None` releases the lease. Returns `false` (without writing)
    /// when the stored record differs from `expected`.
    fn try_swap_lease(
        &self,
        expected: Option<&LeaseRecord>,
        next: Option<LeaseRecord>,
    ) -> Result<bool>;
}
