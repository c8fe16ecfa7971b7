//! Lagoon: an embeddable SQL database storage core.
//!
//! One logical design persists durably in two environments: a shared
//! in-process store that several handles may open concurrently (the
//! browser-tab model), and a native filesystem directory. The SQL surface
//! is an external collaborator plugged in through [`QueryEngine`]; beneath
//! it sit the pieces this crate actually provides:
//!
//! - a block store with atomic multi-block writes, transparent encryption,
//!   and checksummed reads ([`lagoon_store`]),
//! - a transaction layer with read-your-own-writes and atomic commit
//!   ([`lagoon_txn`]),
//! - lease-based leader election so many handles can share one store with
//!   a single writer at any instant ([`lagoon_coord`]),
//! - streaming cursors, prepared statements, optimistic write tracking,
//!   coordination metrics, and whole-store snapshots ([`lagoon_core`]).
//!
//! ```no_run
//! use lagoon::{Database, OpenOptions, Result};
//! # fn engine() -> Box<dyn lagoon::QueryEngine> { unimplemented!() }
//! # fn main() -> Result<()> {
//! let mut db = Database::open("app", OpenOptions::native("/var/lib/app"), engine())?;
//! db.transaction(|db| {
//!     db.execute("INSERT INTO events VALUES (1, 'started')")?;
//!     Ok(())
//! })?;
//! # Ok(()) }
//! ```

pub use lagoon_coord::{
    CoordinationConfig, CoordinationEvent, CoordinationMetrics, CoordinationService,
    CoordinationSubscription, OptimisticWriteQueue, TickOutcome,
};
pub use lagoon_core::{
    Backend, CursorManager, Database, HandleArena, MaterializedCursor, OpenOptions, PreparedPlan,
    QueryEngine, RowCursor, StatementManager,
};
pub use lagoon_error::{ErrorClass, LagoonError, Result};
pub use lagoon_store::{
    BlockStore, Cipher, FileStore, LeaseStore, RawBatch, RawStore, SharedStore, WriteBatch,
};
pub use lagoon_txn::TransactionManager;
pub use lagoon_types::{
    BlockId, EncryptionInfo, LeaseRecord, MetricsSnapshot, Namespace, OptimisticStatus,
    OptimisticWrite, QueryResult, Role, Row, StoreMetadata, Value,
};
