//! Core types shared across the Lagoon crates.
//!
//! This crate is dependency-light by design: everything here is either
//! persisted (and therefore carries serde derives) or crosses a crate
//! boundary between the storage, transaction, and coordination layers.

pub mod coord;
pub mod metadata;
pub mod value;

pub use coord::{LeaseRecord, MetricsSnapshot, OptimisticStatus, OptimisticWrite, Role};
pub use metadata::{EncryptionInfo, Namespace, StoreMetadata};
pub use value::{QueryResult, Row, Value};

use std::fmt;

/// Identifier of one durable block.
///
/// A block id is stable for the lifetime of the store: once written, the id
/// always resolves to the bytes of its most recent committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u64);

impl BlockId {
    /// Raw integer value, used for file names and error reporting.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BlockId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Milliseconds since the Unix epoch.
///
/// The coordination protocol timestamps leases and metrics with wall-clock
/// milliseconds so that independent handles sharing one store agree on
/// lease expiry without exchanging clocks.
#[must_use]
pub fn now_ms() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_display_and_ordering() {
        let a = BlockId(3);
        let b = BlockId::from(7);
        assert_eq!(a.to_string(), "3");
        assert!(a < b);
        assert_eq!(b.get(), 7);
    }

    #[test]
    fn now_ms_is_monotone_enough() {
        let t0 = now_ms();
        let t1 = now_ms();
        assert!(t1 >= t0);
        // Sanity: we are after 2020-01-01.
        assert!(t0 > 1_577_836_800_000.0);
    }
}
