//! Native filesystem backend.
//!
//! Layout per database name:
//!
//! ```text
//! <base>/<name>/blocks-a/<id>      one file per block, namespace A
//! <base>/<name>/blocks-b/<id>      one file per block, namespace B (shadow)
//! <base>/<name>/metadata.json      versioned descriptor
//! ```
//!
//! Batch atomicity: every changed block is first written to a `.tmp` path
//! and synced, then the temp files are renamed into place, and the metadata
//! file is renamed last. The metadata rename is the commit point: a crash
//! mid-batch leaves either the old or the new fully-written state.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use lagoon_error::{LagoonError, Result};
use lagoon_types::{BlockId, Namespace, StoreMetadata};
use tracing::debug;

use crate::traits::{RawBatch, RawStore};

const METADATA_FILE: &str = "metadata.json";

/// Filesystem-backed raw store.
///
/// A single native process is assumed to own a given storage path at a
/// time; there is no cross-process lease on this backend.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    name: String,
}

impl FileStore {
    /// Open (creating if absent) the store for `name` under `base`.
    pub fn open(base: &Path, name: &str) -> Result<Self> {
        let root = base.join(name);
        for dir in [
            root.clone(),
            root.join(Namespace::A.dir_name()),
            root.join(Namespace::B.dir_name()),
        ] {
            fs::create_dir_all(&dir).map_err(|_| LagoonError::CannotOpen { path: dir.clone() })?;
        }

        let store = Self {
            root,
            name: name.to_owned(),
        };
        if !store.metadata_path().exists() {
            store.commit_metadata(&StoreMetadata::new())?;
        }
        debug!(target: "lagoon.store", name, root = %store.root.display(), "opened file store");
        Ok(store)
    }

    /// Root directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    fn block_path(&self, ns: Namespace, id: BlockId) -> PathBuf {
        self.root.join(ns.dir_name()).join(id.get().to_string())
    }

    fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = fs::File::create(path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    }

    /// Write the descriptor via temp file + rename (the commit point).
    fn commit_metadata(&self, meta: &StoreMetadata) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(meta)
            .map_err(|e| LagoonError::internal(format!("metadata encode failed: {e}")))?;
        let tmp = self.root.join(format!("{METADATA_FILE}.tmp"));
        Self::write_synced(&tmp, &encoded)?;
        fs::rename(&tmp, self.metadata_path())?;
        Ok(())
    }
}

impl RawStore for FileStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, ns: Namespace, id: BlockId) -> Result<Vec<u8>> {
        match fs::read(self.block_path(ns, id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LagoonError::BlockNotFound { id: id.get() })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn apply(&self, ns: Namespace, batch: RawBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        debug!(
            target: "lagoon.store",
            name = %self.name,
            writes = batch.writes.len(),
            deletes = batch.deletes.len(),
            with_metadata = batch.metadata.is_some(),
            "applying batch"
        );

        // Phase 1: stage every changed block in a temp file.
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(batch.writes.len());
        for (&id, bytes) in &batch.writes {
            let final_path = self.block_path(ns, id);
            let tmp_path = final_path.with_extension("tmp");
            Self::write_synced(&tmp_path, bytes)?;
            staged.push((tmp_path, final_path));
        }

        // Phase 2: ordered renames, blocks first.
        for (tmp, final_path) in staged {
            fs::rename(&tmp, &final_path)?;
        }
        for &id in &batch.deletes {
            match fs::remove_file(self.block_path(ns, id)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        // Phase 3: metadata rename last, the commit point.
        if let Some(meta) = batch.metadata {
            self.commit_metadata(&meta)?;
        }
        Ok(())
    }

    fn list(&self, ns: Namespace) -> Result<Vec<BlockId>> {
        let mut ids = BTreeSet::new();
        for entry in fs::read_dir(self.root.join(ns.dir_name()))? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(stem) = file_name.to_str() else {
                continue;
            };
            // Skip staged temp files left behind by an interrupted batch.
            if let Ok(raw) = stem.parse::<u64>() {
                ids.insert(BlockId(raw));
            }
        }
        Ok(ids.into_iter().collect())
    }

    fn read_metadata(&self) -> Result<StoreMetadata> {
        let bytes = fs::read(self.metadata_path())?;
        serde_json::from_slice(&bytes)
            .map_err(|e| LagoonError::metadata_corrupt(format!("{}: {e}", self.name)))
    }

    fn clear_namespace(&self, ns: Namespace) -> Result<()> {
        for id in self.list(ns)? {
            match fs::remove_file(self.block_path(ns, id)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn open_temp() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), "testdb").unwrap();
        (dir, store)
    }

    #[test]
    fn open_creates_layout() {
        let (dir, store) = open_temp();
        assert!(dir.path().join("testdb/blocks-a").is_dir());
        assert!(dir.path().join("testdb/blocks-b").is_dir());
        assert!(dir.path().join("testdb/metadata.json").is_file());
        assert_eq!(store.read_metadata().unwrap(), StoreMetadata::new());
    }

    #[test]
    fn batch_write_then_read() {
        let (_dir, store) = open_temp();
        let mut batch = RawBatch::default();
        batch.writes.insert(BlockId(1), vec![1, 2, 3]);
        batch.writes.insert(BlockId(2), vec![4, 5]);
        store.apply(Namespace::A, batch).unwrap();

        assert_eq!(store.read(Namespace::A, BlockId(1)).unwrap(), vec![1, 2, 3]);
        assert_eq!(store.list(Namespace::A).unwrap(), vec![BlockId(1), BlockId(2)]);
        // Other namespace stays empty.
        assert!(store.list(Namespace::B).unwrap().is_empty());
    }

    #[test]
    fn missing_block_is_not_found() {
        let (_dir, store) = open_temp();
        let err = store.read(Namespace::A, BlockId(99)).unwrap_err();
        assert!(matches!(err, LagoonError::BlockNotFound { id: 99 }));
    }

    #[test]
    fn deletes_are_idempotent() {
        let (_dir, store) = open_temp();
        let mut batch = RawBatch::default();
        batch.writes.insert(BlockId(7), vec![0]);
        store.apply(Namespace::A, batch).unwrap();

        let mut del = RawBatch::default();
        del.deletes.insert(BlockId(7));
        del.deletes.insert(BlockId(8)); // never existed
        store.apply(Namespace::A, del).unwrap();
        assert!(store.list(Namespace::A).unwrap().is_empty());
    }

    #[test]
    fn metadata_commits_with_batch() {
        let (_dir, store) = open_temp();
        let mut meta = StoreMetadata::new();
        meta.block_count = 1;
        meta.block_checksums.insert(3, 0xfeed);

        let mut batch = RawBatch::default();
        batch.writes.insert(BlockId(3), vec![9]);
        batch.metadata = Some(meta.clone());
        store.apply(Namespace::A, batch).unwrap();

        assert_eq!(store.read_metadata().unwrap(), meta);
    }

    #[test]
    fn temp_files_are_not_listed() {
        let (dir, store) = open_temp();
        let mut writes = BTreeMap::new();
        writes.insert(BlockId(1), vec![1]);
        store
            .apply(
                Namespace::A,
                RawBatch {
                    writes,
                    ..RawBatch::default()
                },
            )
            .unwrap();
        // Simulate a crash that left a staged temp file behind.
        fs::write(dir.path().join("testdb/blocks-a/2.tmp"), [0]).unwrap();
        assert_eq!(store.list(Namespace::A).unwrap(), vec![BlockId(1)]);
    }

    #[test]
    fn clear_namespace_removes_blocks() {
        let (_dir, store) = open_temp();
        let mut batch = RawBatch::default();
        batch.writes.insert(BlockId(1), vec![1]);
        batch.writes.insert(BlockId(2), vec![2]);
        store.apply(Namespace::B, batch).unwrap();
        store.clear_namespace(Namespace::B).unwrap();
        assert!(store.list(Namespace::B).unwrap().is_empty());
    }

    #[test]
    fn reopen_preserves_metadata() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path(), "db").unwrap();
            let mut meta = StoreMetadata::new();
            meta.schema_version = 5;
            store
                .apply(Namespace::A, RawBatch::metadata_only(meta))
                .unwrap();
        }
        let store = FileStore::open(dir.path(), "db").unwrap();
        assert_eq!(store.read_metadata().unwrap().schema_version, 5);
    }
}
