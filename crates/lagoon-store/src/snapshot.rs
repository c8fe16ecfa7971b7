//! Snapshot export/import.
//!
//! A snapshot is one portable, self-contained artifact holding the last
//! *committed* descriptor fields plus the full plaintext block set. Export
//! never sees an in-flight transaction's overlay (it reads committed store
//! state only); import replaces the target's contents via the same
//! shadow-namespace-then-flip technique as rekey, so observers never see a
//! partially-imported store.
//!
//! Artifact layout (all integers little-endian):
//!
//! ```text
//! Offset  Size  Description
//!   0       8   Magic: "LGSNAP01"
//!   8       4   Header length h
//!  12       h   Header JSON: {schema_version, page_size, block_count}
//!  12+h    ...  Block frames: id u64, len u32, payload bytes
//!  end-8    8   XXH3-64 checksum of every preceding byte
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use lagoon_error::{LagoonError, Result};
use lagoon_types::BlockId;
use tracing::info;
use xxhash_rust::xxh3::xxh3_64;

use crate::store::BlockStore;

const MAGIC: &[u8; 8] = b"LGSNAP01";

/// Caller-visible descriptor fields carried inside the artifact.
#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
struct SnapshotHeader {
    schema_version: u32,
    page_size: u32,
    block_count: u64,
}

impl BlockStore {
    /// Serialize the committed store into one artifact at `path`.
    pub fn export_to_file(&self, path: &Path) -> Result<()> {
        let meta = self.read_metadata()?;
        let header = SnapshotHeader {
            schema_version: meta.schema_version,
            page_size: meta.page_size,
            block_count: meta.block_count,
        };
        let header_json = serde_json::to_vec(&header)
            .map_err(|e| LagoonError::internal(format!("snapshot header encode: {e}")))?;

        let mut artifact = Vec::new();
        artifact.extend_from_slice(MAGIC);
        artifact.extend_from_slice(&(header_json.len() as u32).to_le_bytes());
        artifact.extend_from_slice(&header_json);

        for id in self.list_blocks()? {
            let plaintext = self.read_block(id)?;
            artifact.extend_from_slice(&id.get().to_le_bytes());
            artifact.extend_from_slice(&(plaintext.len() as u32).to_le_bytes());
            artifact.extend_from_slice(&plaintext);
        }
        let checksum = xxh3_64(&artifact);
        artifact.extend_from_slice(&checksum.to_le_bytes());

        let mut file = fs::File::create(path)?;
        file.write_all(&artifact)?;
        file.sync_all()?;
        info!(
            target: "lagoon.store",
            path = %path.display(),
            blocks = header.block_count,
            "exported snapshot"
        );
        Ok(())
    }

    /// Decode the artifact at `path` and atomically replace this store's
    /// contents with it. A malformed artifact leaves the store untouched.
    pub fn import_from_file(&self, path: &Path) -> Result<()> {
        let artifact = fs::read(path)?;
        let (header, blocks) = decode_artifact(&artifact)?;

        self.replace_contents(blocks, header.schema_version, header.page_size)?;
        info!(
            target: "lagoon.store",
            path = %path.display(),
            blocks = header.block_count,
            "imported snapshot"
        );
        Ok(())
    }
}

fn decode_artifact(artifact: &[u8]) -> Result<(SnapshotHeader, BTreeMap<BlockId, Vec<u8>>)> {
    // Checksum first: nothing else is trusted until the trailer matches.
    if artifact.len() < MAGIC.len() + 4 + 8 {
        return Err(LagoonError::snapshot_corrupt("artifact too short"));
    }
    let (body, trailer) = artifact.split_at(artifact.len() - 8);
    let expected = u64::from_le_bytes(trailer.try_into().map_err(|_| {
        LagoonError::snapshot_corrupt("bad checksum trailer")
    })?);
    let actual = xxh3_64(body);
    if expected != actual {
        return Err(LagoonError::snapshot_corrupt(format!(
            "checksum mismatch: expected {expected:#x}, got {actual:#x}"
        )));
    }
    if &body[..MAGIC.len()] != MAGIC {
        return Err(LagoonError::snapshot_corrupt("bad magic"));
    }

    let mut cursor = MAGIC.len();
    let header_len = read_u32(body, &mut cursor)? as usize;
    if cursor + header_len > body.len() {
        return Err(LagoonError::snapshot_corrupt("truncated header"));
    }
    let header: SnapshotHeader = serde_json::from_slice(&body[cursor..cursor + header_len])
        .map_err(|e| LagoonError::snapshot_corrupt(format!("header decode: {e}")))?;
    cursor += header_len;

    let mut blocks = BTreeMap::new();
    while cursor < body.len() {
        let id = read_u64(body, &mut cursor)?;
        let len = read_u32(body, &mut cursor)? as usize;
        if cursor + len > body.len() {
            return Err(LagoonError::snapshot_corrupt("truncated block frame"));
        }
        blocks.insert(BlockId(id), body[cursor..cursor + len].to_vec());
        cursor += len;
    }
    if blocks.len() as u64 != header.block_count {
        return Err(LagoonError::snapshot_corrupt(format!(
            "header promises {} blocks, artifact carries {}",
            header.block_count,
            blocks.len()
        )));
    }
    Ok((header, blocks))
}

fn read_u32(buf: &[u8], cursor: &mut usize) -> Result<u32> {
    let end = *cursor + 4;
    let bytes = buf
        .get(*cursor..end)
        .ok_or_else(|| LagoonError::snapshot_corrupt("truncated u32"))?;
    *cursor = end;
    Ok(u32::from_le_bytes(bytes.try_into().map_err(|_| {
        LagoonError::snapshot_corrupt("truncated u32")
    })?))
}

fn read_u64(buf: &[u8], cursor: &mut usize) -> Result<u64> {
    let end = *cursor + 8;
    let bytes = buf
        .get(*cursor..end)
        .ok_or_else(|| LagoonError::snapshot_corrupt("truncated u64"))?;
    *cursor = end;
    Ok(u64::from_le_bytes(bytes.try_into().map_err(|_| {
        LagoonError::snapshot_corrupt("truncated u64")
    })?))
}
