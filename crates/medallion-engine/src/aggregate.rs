//! GOLD stage: fold typed records past the watermark into the aggregate.

use chrono::Utc;
use medallion_state::LayerStore;
use medallion_types::{AmountStats, Layer, LedgerEntry, LedgerStatus};

use crate::errors::{PipelineError, Result};
use crate::ledger;
use crate::result::{AggregateReport, StageReport};

/// Ledger subject for aggregate runs.
pub const TYPED_TABLE: &str = "typed_events";

/// Maintains the singleton aggregate incrementally.
pub struct Aggregator<'a> {
    store: &'a dyn LayerStore,
    chunk_size: u32,
}

impl<'a> Aggregator<'a> {
    /// `chunk_size` is clamped to at least 1.
    #[must_use]
    pub fn new(store: &'a dyn LayerStore, chunk_size: u32) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Fold every typed record beyond the stored watermark, one chunk per
    /// compare-and-set commit, then record one ledger entry.
    ///
    /// Each iteration starts from the aggregate as last committed, so a
    /// merge that already landed is never applied twice.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::WatermarkConflict`] if another writer moved
    /// the watermark between a chunk's read and its commit, or
    /// [`PipelineError::State`] on store failure. Chunks committed before
    /// the error remain applied.
    pub fn run(&self) -> Result<AggregateReport> {
        let before = self.store.load_aggregate()?;
        let mut folded = AmountStats::new();
        let mut chunks = 0u32;

        let after = loop {
            let current = self.store.load_aggregate()?;
            let chunk = self.store.typed_after(current.watermark, self.chunk_size)?;
            let Some(last) = chunk.last() else {
                break current;
            };
            let last_id = last.raw_id;

            let chunk_stats: AmountStats = chunk.iter().map(|t| &t.price).collect();
            let next = current.fold(&chunk_stats, last_id, Utc::now());
            if !self.store.commit_aggregate(current.watermark, &next)? {
                tracing::warn!(
                    expected = %current.watermark,
                    "Aggregate watermark moved by another writer"
                );
                return Err(PipelineError::WatermarkConflict {
                    expected: current.watermark,
                });
            }

            tracing::debug!(
                rows = chunk_stats.count,
                watermark = %next.watermark,
                "Committed aggregate chunk"
            );
            folded = folded.merge(&chunk_stats);
            chunks += 1;
        };

        let status = if folded.count > 0 {
            LedgerStatus::Success
        } else {
            LedgerStatus::NoNewRows
        };
        let entry = LedgerEntry::new(Layer::Gold, TYPED_TABLE, &folded, self.chunk_size, status);
        ledger::record(self.store, &entry)?;

        tracing::info!(
            records = folded.count,
            chunks,
            total = after.stats.count,
            watermark = %after.watermark,
            status = %status,
            "GOLD stage complete"
        );

        Ok(AggregateReport {
            stage: StageReport {
                layer: Layer::Gold,
                subject: TYPED_TABLE.to_string(),
                records: folded.count,
                stats: folded,
                chunk_size: self.chunk_size,
                chunks,
                status,
            },
            before,
            after,
        })
    }
}
