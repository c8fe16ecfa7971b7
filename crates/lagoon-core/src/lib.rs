//! Database handle, query-engine seam, and handle tables.
//!
//! This crate ties the storage, transaction, and coordination layers into
//! one caller-facing [`Database`] object. SQL execution itself is an
//! external collaborator reached through the [`QueryEngine`] trait.

pub mod cursor;
pub mod database;
pub mod engine;
pub mod handles;
pub mod statement;

pub use cursor::CursorManager;
pub use database::{Backend, Database, OpenOptions};
pub use engine::{MaterializedCursor, PreparedPlan, QueryEngine, RowCursor};
pub use handles::HandleArena;
pub use statement::StatementManager;
