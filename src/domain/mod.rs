//! Domain layer - price feed models and pure logic.
//!
//! No I/O here (hexagonal architecture inner ring): snapshot types, the
//! reconciliation rule, transport/backoff state and wire shapes.

pub mod error;
pub mod feed_config;
pub mod reconciler;
pub mod snapshot;
pub mod transport;
pub mod wire;

// Re-export core types for convenience
pub use error::FeedError;
pub use feed_config::{FeedConfig, FeedConfigPatch, PrimarySource};
pub use reconciler::PriceReconciler;
pub use snapshot::{
    ObservationOrigin, PriceObservation, PriceSnapshot, QuotedValue, SnapshotSource, Symbol,
    ValueOrigin,
};
pub use transport::{
    FeedCondition, ReconnectState, TransportKind, TransportState, TransportStatus,
};
