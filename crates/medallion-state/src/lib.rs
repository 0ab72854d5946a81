//! Layer persistence for the medallion pipeline.
//!
//! Provides the [`LayerStore`] trait plus [`SqliteLayerStore`] and
//! [`PostgresLayerStore`] implementations. Every mutating method is one
//! bounded transaction; callers compose them into chunked stage loops.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod postgres;
pub mod sqlite;

pub use crate::backend::{LayerCounts, LayerStore, ScanScope};
pub use crate::error::StateError;
pub use crate::postgres::PostgresLayerStore;
pub use crate::sqlite::SqliteLayerStore;

/// Convenience re-exports for store consumers and benches.
pub mod prelude {
    pub use crate::backend::{LayerCounts, LayerStore, ScanScope};
    pub use crate::sqlite::SqliteLayerStore;
    pub use medallion_types::{
        Aggregate, Amount, AmountStats, Layer, LedgerEntry, LedgerStatus, NewRawRecord,
        QualityStatus, RawId, SourceLabel, TypedRecord,
    };
}
