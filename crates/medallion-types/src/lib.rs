//! Shared model types for the medallion pipeline.
//!
//! Leaf crate: no I/O. The state and engine crates both depend on it so
//! record, statistics and ledger shapes are defined exactly once.

pub mod amount;
pub mod ledger;
pub mod record;
pub mod stats;

pub use amount::Amount;
pub use ledger::{Layer, LedgerEntry, LedgerRecord, LedgerStatus};
pub use record::{NewRawRecord, QualityStatus, RawId, RawRecord, SourceLabel, TypedRecord};
pub use stats::{Aggregate, AmountStats};
