//! Durable block storage for Lagoon.
//!
//! Two interchangeable backends implement [`RawStore`]: [`FileStore`]
//! persists one file per block under a database directory, and
//! [`SharedStore`] is a shared in-process object store that several handles
//! may open concurrently (the shared backend also carries the election
//! lease via [`LeaseStore`]). [`BlockStore`] wraps either backend with
//! transparent encryption, checksums, rekey, and snapshot export/import.

mod cipher;
mod file;
mod shared;
mod snapshot;
mod store;
mod traits;

pub use cipher::Cipher;
pub use file::FileStore;
pub use shared::SharedStore;
pub use store::{BlockStore, WriteBatch};
pub use traits::{LeaseStore, RawBatch, RawStore};
