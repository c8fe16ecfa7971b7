use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for Lagoon operations.
///
/// Structured variants for the recoverable cases a caller is expected to
/// branch on, grouped by the recovery class returned from
/// [`LagoonError::class`].
#[derive(Error, Debug)]
pub enum LagoonError {
    // === Not found ===
    /// Unknown block id.
    #[error("block not found: {id}")]
    BlockNotFound { id: u64 },

    /// Unknown or already-finalized stream handle.
    #[error("no such stream: {handle}")]
    StreamNotFound { handle: u64 },

    /// Unknown or already-finalized prepared-statement handle.
    #[error("no such prepared statement: {handle}")]
    StatementNotFound { handle: u64 },

    // === I/O ===
    /// Backend read/write failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store directory could not be opened or created.
    #[error("unable to open store at '{path}'")]
    CannotOpen { path: PathBuf },

    // === Transaction conflicts ===
    /// Write attempted while another session holds the lease.
    #[error("write rejected: not the leader (current leader: {leader})")]
    NotLeader { leader: String },

    /// This session's term was superseded by a higher one mid-operation.
    #[error("lease superseded: observed term {observed}, ours was {ours}")]
    TermSuperseded { observed: u64, ours: u64 },

    // === Encryption ===
    /// Key presented at open does not match the store's key fingerprint.
    #[error("wrong encryption key for this store")]
    WrongKey,

    /// Encrypt/decrypt/rekey failure. Prior state remains readable under
    /// the old key.
    #[error("encryption error: {detail}")]
    Encryption { detail: String },

    // === Protocol misuse ===
    /// `begin` while a transaction is already open.
    #[error("cannot start a transaction within a transaction")]
    NestedTransaction,

    /// `commit`/`rollback` without an open transaction.
    #[error("no transaction is active")]
    NoActiveTransaction,

    /// Store-wide maintenance (rekey, snapshot import) attempted while a
    /// transaction is open.
    #[error("operation requires no open transaction")]
    TransactionOpen,

    /// `close_stream` on a handle that was already closed.
    #[error("stream {handle} is already closed")]
    StreamAlreadyClosed { handle: u64 },

    /// Operation on a database handle after `close()`.
    #[error("database handle is closed")]
    DatabaseClosed,

    // === Corruption ===
    /// Stored block bytes do not match the recorded checksum.
    #[error("checksum mismatch for block {id}: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { id: u64, expected: u64, actual: u64 },

    /// Metadata descriptor could not be decoded.
    #[error("store metadata is malformed: {detail}")]
    MetadataCorrupt { detail: String },

    /// Snapshot artifact failed validation; the target store is untouched.
    #[error("snapshot artifact is malformed: {detail}")]
    SnapshotCorrupt { detail: String },

    // === Internal ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse recovery class, one per branch of the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Unknown block/stream/statement; caller retries or surfaces.
    NotFound,
    /// Backend failure; reads retry, writes leave the transaction open.
    Io,
    /// Lost a coordination race; refresh and retry.
    Conflict,
    /// Wrong key or aborted rekey; prior state is still readable.
    Encryption,
    /// Programmer error; not retried.
    Protocol,
    /// Fatal for this handle; re-import from a known-good snapshot.
    Corruption,
}

impl LagoonError {
    /// Map this error to its recovery class.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::BlockNotFound { .. }
            | Self::StreamNotFound { .. }
            | Self::StatementNotFound { .. } => ErrorClass::NotFound,
            Self::Io(_) | Self::CannotOpen { .. } => ErrorClass::Io,
            Self::NotLeader { .. } | Self::TermSuperseded { .. } => ErrorClass::Conflict,
            Self::WrongKey | Self::Encryption { .. } => ErrorClass::Encryption,
            Self::NestedTransaction
            | Self::NoActiveTransaction
            | Self::TransactionOpen
            | Self::StreamAlreadyClosed { .. }
            | Self::DatabaseClosed => ErrorClass::Protocol,
            Self::ChecksumMismatch { .. }
            | Self::MetadataCorrupt { .. }
            | Self::SnapshotCorrupt { .. } => ErrorClass::Corruption,
            Self::Internal(_) => ErrorClass::Protocol,
        }
    }

    /// Whether this error may succeed on a plain retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotLeader { .. } | Self::TermSuperseded { .. } | Self::Io(_)
        )
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotLeader { .. } | Self::TermSuperseded { .. } => {
                Some("Refresh and retry; another handle currently holds write rights")
            }
            Self::WrongKey => Some("Reopen the store with the key it was last rekeyed to"),
            Self::ChecksumMismatch { .. } | Self::MetadataCorrupt { .. } => {
                Some("Re-import from a known-good snapshot")
            }
            Self::NestedTransaction | Self::TransactionOpen => {
                Some("Commit or roll back the open transaction first")
            }
            _ => None,
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an encryption error.
    pub fn encryption(detail: impl Into<String>) -> Self {
        Self::Encryption {
            detail: detail.into(),
        }
    }

    /// Create a snapshot-corruption error.
    pub fn snapshot_corrupt(detail: impl Into<String>) -> Self {
        Self::SnapshotCorrupt {
            detail: detail.into(),
        }
    }

    /// Create a metadata-corruption error.
    pub fn metadata_corrupt(detail: impl Into<String>) -> Self {
        Self::MetadataCorrupt {
            detail: detail.into(),
        }
    }
}

/// Result type alias using `LagoonError`.
pub type Result<T> = std::result::Result<T, LagoonError>;
