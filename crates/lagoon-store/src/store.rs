//! The backend-agnostic block store.
//!
//! [`BlockStore`] layers three concerns over a [`RawStore`]:
//!
//! - transparent encryption (payloads encrypted before backend writes,
//!   decrypted after backend reads),
//! - XXH3 checksums of the stored bytes, verified on every read,
//! - the shadow-namespace-then-flip protocol shared by `rekey` and
//!   snapshot import.
//!
//! The transaction layer above sees only plaintext bytes keyed by block id.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use lagoon_error::{LagoonError, Result};
use lagoon_types::{BlockId, EncryptionInfo, Namespace, StoreMetadata};
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::cipher::Cipher;
use crate::traits::{RawBatch, RawStore};

/// One atomic, plaintext-level mutation of the store.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    /// Block payloads to write.
    pub writes: BTreeMap<BlockId, Vec<u8>>,
    /// Block ids to delete.
    pub deletes: BTreeSet<BlockId>,
}

impl WriteBatch {
    /// True when the batch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }
}

/// Durable key→bytes storage with all-or-nothing batch writes.
pub struct BlockStore {
    raw: Arc<dyn RawStore>,
    cipher: RwLock<Option<Cipher>>,
}

impl BlockStore {
    /// Open a store over `raw`, optionally unlocking it with a passphrase.
    ///
    /// A passphrase on a store that already has a different key fails with
    /// `WrongKey` before any payload is touched. A passphrase on a fresh,
    /// empty store enables encryption and records the key fingerprint.
    pub fn open(raw: Arc<dyn RawStore>, passphrase: Option<&str>) -> Result<Self> {
        let meta = raw.read_metadata()?;
        let cipher = passphrase.map(Cipher::derive);

        match (&meta.encryption, &cipher) {
            (EncryptionInfo { enabled: true, key_fingerprint }, Some(c)) => {
                if key_fingerprint.as_deref() != Some(c.fingerprint()) {
                    return Err(LagoonError::WrongKey);
                }
            }
            (EncryptionInfo { enabled: true, .. }, None) => {
                return Err(LagoonError::WrongKey);
            }
            (EncryptionInfo { enabled: false, .. }, Some(c)) => {
                if meta.block_count > 0 {
                    return Err(LagoonError::encryption(
                        "store already holds unencrypted blocks; use rekey on an empty store",
                    ));
                }
                let mut enabled = meta.clone();
                enabled.encryption = EncryptionInfo {
                    enabled: true,
                    key_fingerprint: Some(c.fingerprint().to_owned()),
                };
                raw.apply(enabled.active_namespace, RawBatch::metadata_only(enabled))?;
                info!(target: "lagoon.store", name = raw.name(), "enabled encryption for empty store");
            }
            (EncryptionInfo { enabled: false, .. }, None) => {}
        }

        Ok(Self {
            raw,
            cipher: RwLock::new(cipher),
        })
    }

    /// The underlying backend.
    #[must_use]
    pub fn raw(&self) -> &Arc<dyn RawStore> {
        &self.raw
    }

    /// Whether payloads are encrypted at rest.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.cipher.read().is_some()
    }

    /// Check the live cipher against the committed key fingerprint.
    ///
    /// A peer handle over the same backend may have rekeyed since this
    /// handle derived its cipher. Checksums cover the stored bytes, so a
    /// stale keystream would pass them and decrypt to garbage; the
    /// fingerprint comparison turns that into `WrongKey` instead.
    fn verify_cipher(&self, meta: &StoreMetadata) -> Result<()> {
        match (&meta.encryption, &*self.cipher.read()) {
            (
                EncryptionInfo {
                    enabled: true,
                    key_fingerprint,
                },
                Some(c),
            ) if key_fingerprint.as_deref() == Some(c.fingerprint()) => Ok(()),
            (EncryptionInfo { enabled: true, .. }, _) => Err(LagoonError::WrongKey),
            (EncryptionInfo { enabled: false, .. }, _) => Ok(()),
        }
    }

    /// Read one block, verifying its checksum and decrypting transparently.
    pub fn read_block(&self, id: BlockId) -> Result<Vec<u8>> {
        let meta = self.raw.read_metadata()?;
        self.verify_cipher(&meta)?;
        let stored = self.raw.read(meta.active_namespace, id)?;

        if let Some(&expected) = meta.block_checksums.get(&id.get()) {
            let actual = xxh3_64(&stored);
            if actual != expected {
                return Err(LagoonError::ChecksumMismatch {
                    id: id.get(),
                    expected,
                    actual,
                });
            }
        }

        match &*self.cipher.read() {
            Some(c) => c.decrypt(id, &stored),
            None => Ok(stored),
        }
    }

    /// Apply a batch all-or-nothing, committing updated metadata with it.
    pub fn write_blocks(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut meta = self.raw.read_metadata()?;
        self.verify_cipher(&meta)?;
        let ns = meta.active_namespace;

        let cipher = self.cipher.read();
        let mut raw_batch = RawBatch::default();
        for (id, plaintext) in batch.writes {
            let stored = match &*cipher {
                Some(c) => c.encrypt(id, &plaintext),
                None => plaintext,
            };
            meta.block_checksums.insert(id.get(), xxh3_64(&stored));
            raw_batch.writes.insert(id, stored);
        }
        for id in batch.deletes {
            meta.block_checksums.remove(&id.get());
            raw_batch.deletes.insert(id);
        }
        meta.block_count = meta.block_checksums.len() as u64;
        raw_batch.metadata = Some(meta);

        self.raw.apply(ns, raw_batch)
    }

    /// Delete a single block.
    pub fn delete_block(&self, id: BlockId) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.deletes.insert(id);
        self.write_blocks(batch)
    }

    /// Read the current descriptor.
    pub fn read_metadata(&self) -> Result<StoreMetadata> {
        self.raw.read_metadata()
    }

    /// Commit caller-owned descriptor fields (schema version, page size).
    ///
    /// Managed fields (block count, checksums, namespace, encryption) are
    /// preserved from the committed state so callers cannot desynchronize
    /// them from the block set they describe.
    pub fn write_metadata(&self, meta: &StoreMetadata) -> Result<()> {
        let mut current = self.raw.read_metadata()?;
        current.schema_version = meta.schema_version;
        current.page_size = meta.page_size;
        let ns = current.active_namespace;
        self.raw.apply(ns, RawBatch::metadata_only(current))
    }

    /// List all live block ids.
    pub fn list_blocks(&self) -> Result<Vec<BlockId>> {
        let meta = self.raw.read_metadata()?;
        self.raw.list(meta.active_namespace)
    }

    /// Re-encrypt every block under `new_key`, all-or-nothing.
    ///
    /// The re-encrypted block set is written into the inactive namespace and
    /// a single metadata commit flips both the key fingerprint and the
    /// active namespace. Any failure before that flip leaves the store fully
    /// readable under the old key.
    pub fn rekey(&self, new_key: &str) -> Result<()> {
        let meta = self.raw.read_metadata()?;
        self.verify_cipher(&meta)?;
        let active = meta.active_namespace;
        let shadow = active.other();
        let new_cipher = Cipher::derive(new_key);

        // Stale shadow contents from an earlier aborted flip.
        self.raw.clear_namespace(shadow)?;

        let mut raw_batch = RawBatch::default();
        let mut checksums = BTreeMap::new();
        for id in self.raw.list(active)? {
            let plaintext = self.read_block(id)?;
            let stored = new_cipher.encrypt(id, &plaintext);
            checksums.insert(id.get(), xxh3_64(&stored));
            raw_batch.writes.insert(id, stored);
        }

        let mut new_meta = meta.clone();
        new_meta.active_namespace = shadow;
        new_meta.block_checksums = checksums;
        new_meta.block_count = new_meta.block_checksums.len() as u64;
        new_meta.encryption = EncryptionInfo {
            enabled: true,
            key_fingerprint: Some(new_cipher.fingerprint().to_owned()),
        };
        raw_batch.metadata = Some(new_meta);

        // The flip: blocks and descriptor land in one atomic unit.
        self.raw.apply(shadow, raw_batch)?;
        *self.cipher.write() = Some(new_cipher);
        info!(target: "lagoon.store", name = self.raw.name(), "rekey complete");

        // Old-namespace cleanup is best effort; the flip already committed.
        if let Err(e) = self.raw.clear_namespace(active) {
            warn!(target: "lagoon.store", error = %e, "post-rekey cleanup failed");
        }
        Ok(())
    }

    /// Replace the full block set and descriptor via shadow namespace + flip.
    ///
    /// `blocks` are plaintext payloads; they are encrypted under the current
    /// key. Used by snapshot import.
    pub(crate) fn replace_contents(
        &self,
        blocks: BTreeMap<BlockId, Vec<u8>>,
        schema_version: u32,
        page_size: u32,
    ) -> Result<()> {
        let meta = self.raw.read_metadata()?;
        self.verify_cipher(&meta)?;
        let active = meta.active_namespace;
        let shadow = active.other();
        self.raw.clear_namespace(shadow)?;

        let cipher = self.cipher.read();
        let mut raw_batch = RawBatch::default();
        let mut checksums = BTreeMap::new();
        for (id, plaintext) in blocks {
            let stored = match &*cipher {
                Some(c) => c.encrypt(id, &plaintext),
                None => plaintext,
            };
            checksums.insert(id.get(), xxh3_64(&stored));
            raw_batch.writes.insert(id, stored);
        }

        let mut new_meta = meta.clone();
        new_meta.active_namespace = shadow;
        new_meta.schema_version = schema_version;
        new_meta.page_size = page_size;
        new_meta.block_count = checksums.len() as u64;
        new_meta.block_checksums = checksums;
        raw_batch.metadata = Some(new_meta);

        self.raw.apply(shadow, raw_batch)?;
        debug!(target: "lagoon.store", name = self.raw.name(), "store contents replaced");

        if let Err(e) = self.raw.clear_namespace(active) {
            warn!(target: "lagoon.store", error = %e, "post-import cleanup failed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("backend", &self.raw.name())
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::SharedStore;
    use crate::FileStore;

    fn shared_store(passphrase: Option<&str>) -> BlockStore {
        let raw = Arc::new(SharedStore::new("db"));
        BlockStore::open(raw, passphrase).unwrap()
    }

    fn batch(pairs: &[(u64, &[u8])]) -> WriteBatch {
        let mut b = WriteBatch::default();
        for &(id, bytes) in pairs {
            b.writes.insert(BlockId(id), bytes.to_vec());
        }
        b
    }

    #[test]
    fn write_then_read_plaintext() {
        let store = shared_store(None);
        store.write_blocks(batch(&[(1, b"alpha"), (2, b"beta")])).unwrap();
        assert_eq!(store.read_block(BlockId(1)).unwrap(), b"alpha");
        assert_eq!(store.read_metadata().unwrap().block_count, 2);
    }

    #[test]
    fn encrypted_round_trip_and_at_rest_difference() {
        let raw = Arc::new(SharedStore::new("db"));
        let store = BlockStore::open(raw.clone(), Some("k1")).unwrap();
        store.write_blocks(batch(&[(1, b"payload")])).unwrap();

        assert_eq!(store.read_block(BlockId(1)).unwrap(), b"payload");
        // At-rest bytes differ from the plaintext.
        let meta = raw.read_metadata().unwrap();
        let stored = raw.read(meta.active_namespace, BlockId(1)).unwrap();
        assert_ne!(stored, b"payload".to_vec());
    }

    #[test]
    fn wrong_key_rejected_at_open() {
        let raw = Arc::new(SharedStore::new("db"));
        {
            let store = BlockStore::open(raw.clone(), Some("k1")).unwrap();
            store.write_blocks(batch(&[(1, b"x")])).unwrap();
        }
        assert!(matches!(
            BlockStore::open(raw.clone(), Some("k2")),
            Err(LagoonError::WrongKey)
        ));
        assert!(matches!(
            BlockStore::open(raw, None),
            Err(LagoonError::WrongKey)
        ));
    }

    #[test]
    fn checksum_mismatch_surfaces_corruption() {
        let raw = Arc::new(SharedStore::new("db"));
        let store = BlockStore::open(raw.clone(), None).unwrap();
        store.write_blocks(batch(&[(1, b"good")])).unwrap();

        // Flip stored bytes behind the store's back.
        let meta = raw.read_metadata().unwrap();
        let mut evil = RawBatch::default();
        evil.writes.insert(BlockId(1), b"evil".to_vec());
        raw.apply(meta.active_namespace, evil).unwrap();

        let err = store.read_block(BlockId(1)).unwrap_err();
        assert!(matches!(err, LagoonError::ChecksumMismatch { id: 1, .. }));
    }

    #[test]
    fn delete_updates_count_and_checksums() {
        let store = shared_store(None);
        store.write_blocks(batch(&[(1, b"a"), (2, b"b")])).unwrap();
        store.delete_block(BlockId(1)).unwrap();

        let meta = store.read_metadata().unwrap();
        assert_eq!(meta.block_count, 1);
        assert!(!meta.block_checksums.contains_key(&1));
        assert!(matches!(
            store.read_block(BlockId(1)),
            Err(LagoonError::BlockNotFound { id: 1 })
        ));
    }

    #[test]
    fn rekey_round_trip_on_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        {
            let raw = Arc::new(FileStore::open(dir.path(), "db").unwrap());
            let store = BlockStore::open(raw, Some("k1")).unwrap();
            store.write_blocks(batch(&[(1, b"one"), (2, b"two")])).unwrap();
            store.rekey("k2").unwrap();
            // Still readable through the live handle.
            assert_eq!(store.read_block(BlockId(2)).unwrap(), b"two");
        }

        // Old key no longer opens the store.
        let raw = Arc::new(FileStore::open(dir.path(), "db").unwrap());
        assert!(matches!(
            BlockStore::open(raw, Some("k1")),
            Err(LagoonError::WrongKey)
        ));

        let raw = Arc::new(FileStore::open(dir.path(), "db").unwrap());
        let store = BlockStore::open(raw, Some("k2")).unwrap();
        assert_eq!(store.read_block(BlockId(1)).unwrap(), b"one");
        assert_eq!(store.read_block(BlockId(2)).unwrap(), b"two");
    }

    #[test]
    fn stale_handle_is_rejected_after_peer_rekey() {
        let raw = Arc::new(SharedStore::new("db"));
        let a = BlockStore::open(raw.clone(), Some("k1")).unwrap();
        let b = BlockStore::open(raw, Some("k1")).unwrap();
        a.write_blocks(batch(&[(1, b"payload")])).unwrap();

        a.rekey("k2").unwrap();

        // The peer's cipher is now stale; its keystream would decrypt to
        // garbage without tripping the stored-bytes checksum, so reads and
        // writes must fail with WrongKey instead.
        assert!(matches!(b.read_block(BlockId(1)), Err(LagoonError::WrongKey)));
        assert!(matches!(
            b.write_blocks(batch(&[(2, b"late")])),
            Err(LagoonError::WrongKey)
        ));
        assert!(matches!(b.rekey("k3"), Err(LagoonError::WrongKey)));

        // The rekeying handle keeps working.
        assert_eq!(a.read_block(BlockId(1)).unwrap(), b"payload");
    }

    #[test]
    fn plaintext_handle_is_rejected_after_peer_rekey() {
        let raw = Arc::new(SharedStore::new("db"));
        let plain = BlockStore::open(raw.clone(), None).unwrap();
        plain.write_blocks(batch(&[(1, b"open")])).unwrap();

        let peer = BlockStore::open(raw, None).unwrap();
        peer.rekey("k1").unwrap();

        assert!(matches!(
            plain.read_block(BlockId(1)),
            Err(LagoonError::WrongKey)
        ));
    }

    #[test]
    fn rekey_flips_namespace() {
        let store = shared_store(Some("k1"));
        store.write_blocks(batch(&[(1, b"x")])).unwrap();
        assert_eq!(store.read_metadata().unwrap().active_namespace, Namespace::A);
        store.rekey("k2").unwrap();
        let meta = store.read_metadata().unwrap();
        assert_eq!(meta.active_namespace, Namespace::B);
        assert_eq!(meta.block_count, 1);
    }

    #[test]
    fn write_metadata_preserves_managed_fields() {
        let store = shared_store(None);
        store.write_blocks(batch(&[(1, b"x")])).unwrap();

        let mut meta = store.read_metadata().unwrap();
        meta.schema_version = 9;
        meta.block_count = 999; // caller lies; must be ignored
        meta.block_checksums.clear();
        store.write_metadata(&meta).unwrap();

        let committed = store.read_metadata().unwrap();
        assert_eq!(committed.schema_version, 9);
        assert_eq!(committed.block_count, 1);
        assert_eq!(committed.block_checksums.len(), 1);
    }

    #[test]
    fn key_on_nonempty_plaintext_store_is_rejected() {
        let raw = Arc::new(SharedStore::new("db"));
        {
            let store = BlockStore::open(raw.clone(), None).unwrap();
            store.write_blocks(batch(&[(1, b"x")])).unwrap();
        }
        assert!(matches!(
            BlockStore::open(raw, Some("k1")),
            Err(LagoonError::Encryption { .. })
        ));
    }
}
