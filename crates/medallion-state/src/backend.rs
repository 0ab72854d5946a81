//! Layer store trait definition.
//!
//! [`LayerStore`] is the storage contract for the raw, typed and aggregate
//! layers plus the batch ledger. Model types live in [`medallion_types`].

use medallion_types::{
    Aggregate, AmountStats, LedgerEntry, LedgerRecord, NewRawRecord, RawId, RawRecord,
    SourceLabel, TypedRecord,
};

use crate::error;

/// Which typed records a full-scan statistics query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanScope {
    All,
    OnlySource(SourceLabel),
    ExcludingSource(SourceLabel),
}

/// Row counts per layer, for health checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerCounts {
    pub raw: u64,
    pub typed: u64,
    pub ledger: u64,
}

/// Storage contract for the pipeline layers.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn LayerStore>`.
/// Each mutating method commits exactly one transaction; nothing spans calls.
pub trait LayerStore: Send + Sync {
    /// Append raw rows in one transaction, skipping rows whose
    /// `(source, row_number)` already exists.
    ///
    /// Returns the row numbers that were actually inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure;
    /// nothing from the batch is persisted in that case.
    fn insert_raw_batch(&self, rows: &[NewRawRecord]) -> error::Result<Vec<u32>>;

    /// Raw records with no typed counterpart, ascending by id, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn pending_raw(&self, limit: u32) -> error::Result<Vec<RawRecord>>;

    /// Insert typed records in one transaction; existing `raw_id`s are left
    /// untouched. Returns the count inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn insert_typed_batch(&self, rows: &[TypedRecord]) -> error::Result<u64>;

    /// Read the singleton aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure or
    /// if a stored value can't be decoded.
    fn load_aggregate(&self) -> error::Result<Aggregate>;

    /// Typed records with `raw_id > watermark`, ascending, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn typed_after(&self, watermark: RawId, limit: u32) -> error::Result<Vec<TypedRecord>>;

    /// Compare-and-set: replace the aggregate with `next` only if the stored
    /// watermark still equals `expected`.
    ///
    /// Returns `true` if the update was applied. Statistics and watermark
    /// change in a single statement.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn commit_aggregate(&self, expected: RawId, next: &Aggregate) -> error::Result<bool>;

    /// Append a ledger entry, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn append_ledger(&self, entry: &LedgerEntry) -> error::Result<i64>;

    /// All ledger entries in write order.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn ledger_entries(&self) -> error::Result<Vec<LedgerRecord>>;

    /// Current row counts.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn layer_counts(&self) -> error::Result<LayerCounts>;

    /// Full-scan price statistics over the typed layer.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn typed_stats(&self, scope: &ScanScope) -> error::Result<AmountStats>;
}
