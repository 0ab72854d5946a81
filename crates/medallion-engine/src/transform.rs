//! SILVER stage: type pending raw records.

use chrono::Utc;
use medallion_state::LayerStore;
use medallion_types::{AmountStats, Layer, LedgerEntry, LedgerStatus, QualityStatus, TypedRecord};

use crate::coerce::coerce_record;
use crate::errors::Result;
use crate::ledger;
use crate::result::{StageReport, TransformReport};

/// Ledger subject for transform runs.
pub const RAW_TABLE: &str = "raw_events";

/// Moves raw records without a typed counterpart into the typed layer.
pub struct Transformer<'a> {
    store: &'a dyn LayerStore,
    chunk_size: u32,
}

impl<'a> Transformer<'a> {
    /// `chunk_size` is clamped to at least 1.
    #[must_use]
    pub fn new(store: &'a dyn LayerStore, chunk_size: u32) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Transform pending raw records chunk by chunk until none are left,
    /// then record one ledger entry for the whole run.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails. Chunks already committed stay
    /// committed; a re-run picks up where this one stopped.
    pub fn run(&self) -> Result<TransformReport> {
        let mut stats = AmountStats::new();
        let mut coerced = 0u64;
        let mut chunks = 0u32;

        loop {
            let pending = self.store.pending_raw(self.chunk_size)?;
            if pending.is_empty() {
                break;
            }

            let loaded_at = Utc::now();
            let typed: Vec<TypedRecord> =
                pending.iter().map(|raw| coerce_record(raw, loaded_at)).collect();
            let written = self.store.insert_typed_batch(&typed)?;

            let chunk_coerced = typed
                .iter()
                .filter(|t| t.dq_status == QualityStatus::Coerced)
                .count() as u64;
            coerced += chunk_coerced;
            stats.extend(typed.iter().map(|t| &t.price));
            chunks += 1;

            tracing::debug!(
                rows = typed.len(),
                written,
                coerced = chunk_coerced,
                "Committed typed chunk"
            );
        }

        let status = if stats.count > 0 {
            LedgerStatus::Success
        } else {
            LedgerStatus::NoNewRows
        };
        let entry = LedgerEntry::new(Layer::Silver, RAW_TABLE, &stats, self.chunk_size, status)
            .with_detail(format!("rows coerced: {coerced}"));
        ledger::record(self.store, &entry)?;

        tracing::info!(
            records = stats.count,
            coerced,
            chunks,
            avg = ?stats.average().map(|a| a.to_string()),
            status = %status,
            "SILVER stage complete"
        );

        Ok(TransformReport {
            stage: StageReport {
                layer: Layer::Silver,
                subject: RAW_TABLE.to_string(),
                records: stats.count,
                stats,
                chunk_size: self.chunk_size,
                chunks,
                status,
            },
            coerced,
        })
    }
}
