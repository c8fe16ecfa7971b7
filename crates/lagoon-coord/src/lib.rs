//! Multi-writer coordination for Lagoon: lease-based leader election,
//! coordination metrics, and optimistic write tracking.
//!
//! Everything here operates on the [`lagoon_store::LeaseStore`] seam, so
//! election only exists where the backend is actually shared between
//! handles. The native file backend never constructs a session.

pub mod metrics;
pub mod optimistic;
pub mod service;

pub use metrics::CoordinationMetrics;
pub use optimistic::OptimisticWriteQueue;
pub use service::{
    CoordinationConfig, CoordinationEvent, CoordinationService, CoordinationSubscription,
    TickOutcome,
};
