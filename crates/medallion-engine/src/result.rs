//! Stage run reports.

use medallion_types::{Aggregate, Amount, AmountStats, Layer, LedgerStatus, SourceLabel};

/// Summary of one stage invocation, mirroring the ledger entry it wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub layer: Layer,
    pub subject: String,
    pub records: u64,
    pub stats: AmountStats,
    pub chunk_size: u32,
    pub chunks: u32,
    pub status: LedgerStatus,
}

/// Terminal state of one ingested source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub source: SourceLabel,
    pub status: LedgerStatus,
    /// Data rows read after the header, malformed ones included.
    pub rows_read: u64,
    /// Rows dropped for having the wrong column count.
    pub rows_dropped: u64,
    /// Rows newly persisted (duplicates excluded).
    pub inserted: u64,
    /// Amounts of the newly persisted rows.
    pub stats: AmountStats,
}

/// Result of an ingest run over many sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub sources: Vec<IngestOutcome>,
    pub excluded: Vec<SourceLabel>,
}

impl IngestReport {
    /// Rows inserted across all sources.
    #[must_use]
    pub fn inserted(&self) -> u64 {
        self.sources.iter().map(|s| s.inserted).sum()
    }

    /// Amount statistics over every newly inserted row.
    #[must_use]
    pub fn stats(&self) -> AmountStats {
        self.sources
            .iter()
            .fold(AmountStats::new(), |acc, s| acc.merge(&s.stats))
    }

    /// Outcome for `label`, if it was ingested.
    #[must_use]
    pub fn outcome(&self, label: &str) -> Option<&IngestOutcome> {
        self.sources.iter().find(|s| s.source.as_str() == label)
    }
}

/// Result of a transform run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformReport {
    pub stage: StageReport,
    /// Rows written with `COERCED` status.
    pub coerced: u64,
}

/// Result of an aggregate run, with the aggregate on both sides of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateReport {
    pub stage: StageReport,
    pub before: Aggregate,
    pub after: Aggregate,
}

impl AggregateReport {
    #[must_use]
    pub fn delta_count(&self) -> u64 {
        self.after.stats.count.saturating_sub(self.before.stats.count)
    }

    /// Change in average; an empty side counts as `0.00`.
    #[must_use]
    pub fn delta_avg(&self) -> Amount {
        let avg = |a: &Aggregate| a.stats.average().unwrap_or_else(Amount::zero);
        avg(&self.after).delta(&avg(&self.before))
    }

    /// Change in minimum. When there was no prior minimum the new one is
    /// reported as is.
    #[must_use]
    pub fn delta_min(&self) -> Option<Amount> {
        delta_extreme(self.before.stats.min.as_ref(), self.after.stats.min.as_ref())
    }

    /// Change in maximum, reported like [`delta_min`](Self::delta_min).
    #[must_use]
    pub fn delta_max(&self) -> Option<Amount> {
        delta_extreme(self.before.stats.max.as_ref(), self.after.stats.max.as_ref())
    }
}

fn delta_extreme(before: Option<&Amount>, after: Option<&Amount>) -> Option<Amount> {
    match (before, after) {
        (Some(b), Some(a)) => Some(a.delta(b)),
        (None, Some(a)) => Some(a.clone()),
        (_, None) => None,
    }
}

/// Reports of the stages a pipeline invocation ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineRun {
    pub ingest: Option<IngestReport>,
    pub transform: Option<TransformReport>,
    pub aggregate: Option<AggregateReport>,
}
