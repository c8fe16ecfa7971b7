//! The versioned store descriptor committed alongside block batches.

use std::collections::BTreeMap;

/// Current on-disk format version. Bump on any incompatible layout change.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Default logical page size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Which of the two block namespaces is live.
///
/// Rekey and snapshot import write a complete replacement block set into the
/// inactive namespace and then flip this field in a single metadata commit,
/// so readers only ever observe a fully-written state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Primary namespace (`blocks-a` on the native backend).
    #[default]
    A,
    /// Shadow namespace (`blocks-b` on the native backend).
    B,
}

impl Namespace {
    /// Directory name used by the native backend.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::A => "blocks-a",
            Self::B => "blocks-b",
        }
    }

    /// The other namespace.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Encryption parameters recorded in the store descriptor.
///
/// Only the fingerprint is persisted; the key itself never touches disk.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct EncryptionInfo {
    /// Whether block payloads are encrypted at rest.
    pub enabled: bool,
    /// Short hex digest identifying the active key, used to reject a wrong
    /// key at open time before any payload is decrypted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_fingerprint: Option<String>,
}

/// The small versioned descriptor committed atomically with block batches.
///
/// Invariant: a reader never observes this record pointing at a block set
/// that has not been fully written. On the native backend the metadata
/// rename is the commit point of every batch; on the shared backend the
/// descriptor and the blocks live under one lock.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoreMetadata {
    /// Caller-owned schema version, bumped by migrations.
    pub schema_version: u32,
    /// Number of live blocks in the active namespace.
    pub block_count: u64,
    /// Logical page size.
    pub page_size: u32,
    /// Encryption parameters.
    pub encryption: EncryptionInfo,
    /// On-disk layout version.
    pub store_format_version: u32,
    /// Which block namespace is live.
    #[serde(default)]
    pub active_namespace: Namespace,
    /// XXH3 checksum of each stored (post-encryption) block payload.
    #[serde(default)]
    pub block_checksums: BTreeMap<u64, u64>,
}

impl StoreMetadata {
    /// A fresh descriptor for an empty, unencrypted store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema_version: 1,
            block_count: 0,
            page_size: DEFAULT_PAGE_SIZE,
            encryption: EncryptionInfo::default(),
            store_format_version: STORE_FORMAT_VERSION,
            active_namespace: Namespace::A,
            block_checksums: BTreeMap::new(),
        }
    }
}

impl Default for StoreMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_flip_is_an_involution() {
        assert_eq!(Namespace::A.other(), Namespace::B);
        assert_eq!(Namespace::B.other(), Namespace::A);
        assert_eq!(Namespace::A.other().other(), Namespace::A);
        assert_eq!(Namespace::A.dir_name(), "blocks-a");
        assert_eq!(Namespace::B.dir_name(), "blocks-b");
    }

    #[test]
    fn metadata_json_round_trip() {
        let mut meta = StoreMetadata::new();
        meta.block_count = 3;
        meta.block_checksums.insert(1, 0xdead_beef);
        meta.encryption = EncryptionInfo {
            enabled: true,
            key_fingerprint: Some("ab12".to_owned()),
        };
        let json = serde_json::to_string_pretty(&meta).unwrap();
        let back: StoreMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(meta, back);
    }

    #[test]
    fn metadata_tolerates_missing_optional_fields() {
        // A descriptor written before namespaces/checksums existed must
        // still deserialize.
        let json = r#"{
            "schema_version": 1,
            "block_count": 0,
            "page_size": 4096,
            "encryption": { "enabled": false },
            "store_format_version": 1
        }"#;
        let meta: StoreMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.active_namespace, Namespace::A);
        assert!(meta.block_checksums.is_empty());
        assert_eq!(meta.encryption.key_fingerprint, None);
    }
}
