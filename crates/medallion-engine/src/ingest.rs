//! RAW stage: append source rows with natural-key deduplication.

use std::collections::HashSet;

use medallion_state::LayerStore;
use medallion_types::{AmountStats, Layer, LedgerEntry, LedgerStatus, NewRawRecord, SourceLabel};

use crate::coerce::coerce_amount;
use crate::config::types::EXPECTED_HEADER;
use crate::errors::{PipelineError, Result};
use crate::ledger;
use crate::result::{IngestOutcome, IngestReport};
use crate::source::RecordSource;

/// Writes source rows into the raw layer in fixed-size committed chunks.
pub struct Ingestor<'a> {
    store: &'a dyn LayerStore,
    chunk_size: u32,
    expected_header: Vec<String>,
}

impl<'a> Ingestor<'a> {
    /// `chunk_size` is clamped to at least 1.
    #[must_use]
    pub fn new(store: &'a dyn LayerStore, chunk_size: u32) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            expected_header: EXPECTED_HEADER.iter().map(ToString::to_string).collect(),
        }
    }

    /// Replace the header every source must match exactly.
    #[must_use]
    pub fn with_expected_header(mut self, header: Vec<String>) -> Self {
        self.expected_header = header;
        self
    }

    #[must_use]
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Check the header, ingest the data rows and record one ledger entry.
    ///
    /// A missing or mismatched header skips the whole source.
    ///
    /// # Errors
    ///
    /// Returns an error if the source can't be read or the store fails.
    /// Chunks committed before the failure are kept.
    pub fn ingest_source(&self, source: &mut dyn RecordSource) -> Result<IngestOutcome> {
        let label = source.label().clone();
        tracing::info!(source = %label, "Ingesting source");

        let header = source.header()?;
        if header.as_deref() != Some(self.expected_header.as_slice()) {
            let detail = match &header {
                Some(fields) => format!(
                    "unexpected header {fields:?}, expected {:?}; source skipped",
                    self.expected_header
                ),
                None => "missing header line; source skipped".to_string(),
            };
            tracing::warn!(source = %label, header = ?header, "Skipping source with bad header");

            let entry = LedgerEntry::new(
                Layer::Raw,
                label.as_str(),
                &AmountStats::new(),
                self.chunk_size,
                LedgerStatus::SkippedBadHeader,
            )
            .with_detail(detail);
            ledger::record(self.store, &entry)?;

            return Ok(IngestOutcome {
                source: label,
                status: LedgerStatus::SkippedBadHeader,
                rows_read: 0,
                rows_dropped: 0,
                inserted: 0,
                stats: AmountStats::new(),
            });
        }

        let outcome = self.ingest(source)?;

        let mut entry = LedgerEntry::new(
            Layer::Raw,
            label.as_str(),
            &outcome.stats,
            self.chunk_size,
            outcome.status,
        );
        if outcome.rows_dropped > 0 {
            entry = entry.with_detail(format!("rows dropped: {}", outcome.rows_dropped));
        }
        ledger::record(self.store, &entry)?;

        tracing::info!(
            source = %label,
            rows_read = outcome.rows_read,
            inserted = outcome.inserted,
            dropped = outcome.rows_dropped,
            status = %outcome.status,
            "Source ingested"
        );
        Ok(outcome)
    }

    /// Ingest the data rows of a source whose header was already checked.
    ///
    /// Every data row consumes the next 1-based row number, so rows dropped
    /// for a wrong column count keep later positions stable across runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the source can't be read or the store fails.
    pub fn ingest(&self, source: &mut dyn RecordSource) -> Result<IngestOutcome> {
        let label = source.label().clone();
        let columns = self.expected_header.len();
        let chunk_len = usize::try_from(self.chunk_size).unwrap_or(usize::MAX);

        let mut batch: Vec<NewRawRecord> = Vec::with_capacity(chunk_len.min(1024));
        let mut rows_read = 0u64;
        let mut rows_dropped = 0u64;
        let mut row_number = 0u32;
        let mut inserted = 0u64;
        let mut stats = AmountStats::new();

        while let Some(fields) = source.next_row()? {
            row_number = row_number
                .checked_add(1)
                .ok_or_else(|| PipelineError::unreadable(&label, "row number overflow"))?;
            rows_read += 1;

            if fields.len() != columns {
                tracing::warn!(
                    source = %label,
                    row = row_number,
                    expected = columns,
                    got = fields.len(),
                    "Dropping row with wrong column count"
                );
                rows_dropped += 1;
                continue;
            }
            let fields = match <[String; 3]>::try_from(fields) {
                Ok(fields) => fields,
                Err(fields) => {
                    tracing::warn!(
                        source = %label,
                        row = row_number,
                        expected = EXPECTED_HEADER.len(),
                        got = fields.len(),
                        "Dropping row that does not map onto timestamp, price, user_id"
                    );
                    rows_dropped += 1;
                    continue;
                }
            };
            let [timestamp_raw, price_raw, user_id_raw] = fields;
            batch.push(NewRawRecord {
                source: label.clone(),
                row_number,
                timestamp_raw,
                price_raw,
                user_id_raw,
            });

            if batch.len() >= chunk_len {
                inserted += self.flush(&label, &mut batch, &mut stats)?;
            }
        }
        if !batch.is_empty() {
            inserted += self.flush(&label, &mut batch, &mut stats)?;
        }

        let valid = rows_read - rows_dropped;
        let status = if inserted > 0 {
            LedgerStatus::Success
        } else if valid > 0 {
            LedgerStatus::NoNewRows
        } else {
            LedgerStatus::EmptyFile
        };

        Ok(IngestOutcome {
            source: label,
            status,
            rows_read,
            rows_dropped,
            inserted,
            stats,
        })
    }

    /// Commit one chunk and fold the amounts of rows it actually inserted.
    fn flush(
        &self,
        label: &SourceLabel,
        batch: &mut Vec<NewRawRecord>,
        stats: &mut AmountStats,
    ) -> Result<u64> {
        let inserted: HashSet<u32> = self.store.insert_raw_batch(batch)?.into_iter().collect();
        for row in batch.iter().filter(|r| inserted.contains(&r.row_number)) {
            stats.observe(&coerce_amount(&row.price_raw).value);
        }
        tracing::debug!(
            source = %label,
            rows = batch.len(),
            inserted = inserted.len(),
            "Committed raw chunk"
        );
        batch.clear();
        Ok(inserted.len() as u64)
    }
}

/// Ingest every source not named in `exclude`, in the order given.
///
/// Excluded sources are skipped without a ledger entry.
///
/// # Errors
///
/// Stops at the first source that can't be read or the first store failure.
pub fn ingest_sources<S: RecordSource>(
    ingestor: &Ingestor<'_>,
    sources: &mut [S],
    exclude: &[String],
) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    if sources.is_empty() {
        tracing::info!("No sources to ingest");
    }
    for source in sources.iter_mut() {
        let label = source.label().clone();
        if exclude.iter().any(|e| e == label.as_str()) {
            tracing::info!(source = %label, "Source excluded");
            report.excluded.push(label);
            continue;
        }
        report.sources.push(ingestor.ingest_source(source)?);
    }

    let stats = report.stats();
    tracing::info!(
        sources = report.sources.len(),
        excluded = report.excluded.len(),
        inserted = report.inserted(),
        min = ?stats.min.as_ref().map(ToString::to_string),
        avg = ?stats.average().map(|a| a.to_string()),
        max = ?stats.max.as_ref().map(ToString::to_string),
        "RAW stage complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use medallion_state::SqliteLayerStore;
    use medallion_types::Amount;

    const HEADER: [&str; 3] = ["timestamp", "price", "user_id"];

    fn source(label: &str, rows: Vec<Vec<&str>>) -> MemorySource {
        MemorySource::new(label, Some(HEADER), rows)
    }

    fn row<'a>(price: &'a str) -> Vec<&'a str> {
        vec!["2024-03-01T10:00:00Z", price, "7"]
    }

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    fn ingests_in_chunks_and_reports_success() {
        let store = SqliteLayerStore::in_memory().unwrap();
        let ingestor = Ingestor::new(&store, 2);
        let mut src = source("a.csv", vec![row("1.00"), row("2.005"), row("x")]);

        let outcome = ingestor.ingest_source(&mut src).unwrap();
        assert_eq!(outcome.status, LedgerStatus::Success);
        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.stats.min, Some(amt("0.00")));
        assert_eq!(outcome.stats.max, Some(amt("2.01")));
        assert_eq!(store.layer_counts().unwrap().raw, 3);

        let ledger = store.ledger_entries().unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].entry.layer, Layer::Raw);
        assert_eq!(ledger[0].entry.subject, "a.csv");
        assert_eq!(ledger[0].entry.records, 3);
        assert_eq!(ledger[0].entry.chunk_size, 2);
    }

    #[test]
    fn second_ingest_reports_no_new_rows() {
        let store = SqliteLayerStore::in_memory().unwrap();
        let ingestor = Ingestor::new(&store, 5);
        ingestor
            .ingest_source(&mut source("a.csv", vec![row("1"), row("2")]))
            .unwrap();
        let again = ingestor
            .ingest_source(&mut source("a.csv", vec![row("1"), row("2")]))
            .unwrap();

        assert_eq!(again.status, LedgerStatus::NoNewRows);
        assert_eq!(again.inserted, 0);
        assert!(again.stats.is_empty());
        assert_eq!(store.layer_counts().unwrap().raw, 2);
        let ledger = store.ledger_entries().unwrap();
        assert_eq!(ledger[1].entry.status, LedgerStatus::NoNewRows);
        assert_eq!(ledger[1].entry.avg, None);
    }

    #[test]
    fn appended_rows_are_picked_up_on_reingest() {
        let store = SqliteLayerStore::in_memory().unwrap();
        let ingestor = Ingestor::new(&store, 5);
        ingestor
            .ingest_source(&mut source("a.csv", vec![row("1")]))
            .unwrap();
        let grown = ingestor
            .ingest_source(&mut source("a.csv", vec![row("1"), row("4")]))
            .unwrap();
        assert_eq!(grown.inserted, 1);
        assert_eq!(grown.stats.sum, amt("4.00"));
    }

    #[test]
    fn malformed_rows_are_dropped_but_consume_row_numbers() {
        let store = SqliteLayerStore::in_memory().unwrap();
        let ingestor = Ingestor::new(&store, 5);
        let mut src = source(
            "a.csv",
            vec![row("1"), vec!["only", "two"], row("3"), vec!["a", "b", "c", "d"]],
        );
        let outcome = ingestor.ingest_source(&mut src).unwrap();
        assert_eq!(outcome.rows_read, 4);
        assert_eq!(outcome.rows_dropped, 2);
        assert_eq!(outcome.inserted, 2);

        let rows: Vec<u32> = store
            .pending_raw(10)
            .unwrap()
            .iter()
            .map(|r| r.row_number)
            .collect();
        assert_eq!(rows, vec![1, 3]);
        let ledger = store.ledger_entries().unwrap();
        assert_eq!(ledger[0].entry.detail.as_deref(), Some("rows dropped: 2"));
    }

    #[test]
    fn bad_header_skips_source_with_one_entry() {
        let store = SqliteLayerStore::in_memory().unwrap();
        let ingestor = Ingestor::new(&store, 5);
        let mut src = MemorySource::new("bad.csv", Some(["a", "b"]), vec![vec!["1", "2"]]);

        let outcome = ingestor.ingest_source(&mut src).unwrap();
        assert_eq!(outcome.status, LedgerStatus::SkippedBadHeader);
        assert_eq!(store.layer_counts().unwrap().raw, 0);

        let ledger = store.ledger_entries().unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].entry.status, LedgerStatus::SkippedBadHeader);
        assert_eq!(ledger[0].entry.records, 0);
        let detail = ledger[0].entry.detail.as_deref().unwrap();
        assert!(detail.contains("\"a\", \"b\""));
    }

    #[test]
    fn missing_header_counts_as_bad_header() {
        let store = SqliteLayerStore::in_memory().unwrap();
        let ingestor = Ingestor::new(&store, 5);
        let mut src = MemorySource::new("blank.csv", None::<Vec<String>>, Vec::<Vec<String>>::new());
        let outcome = ingestor.ingest_source(&mut src).unwrap();
        assert_eq!(outcome.status, LedgerStatus::SkippedBadHeader);
    }

    #[test]
    fn header_only_or_all_malformed_is_empty_file() {
        let store = SqliteLayerStore::in_memory().unwrap();
        let ingestor = Ingestor::new(&store, 5);

        let header_only = ingestor
            .ingest_source(&mut source("h.csv", Vec::new()))
            .unwrap();
        assert_eq!(header_only.status, LedgerStatus::EmptyFile);

        let malformed = ingestor
            .ingest_source(&mut source("m.csv", vec![vec!["x"]]))
            .unwrap();
        assert_eq!(malformed.status, LedgerStatus::EmptyFile);
        assert_eq!(malformed.rows_dropped, 1);
    }

    #[test]
    fn custom_header_is_matched_exactly() {
        let store = SqliteLayerStore::in_memory().unwrap();
        let ingestor = Ingestor::new(&store, 5)
            .with_expected_header(vec!["ts".into(), "amount".into(), "customer".into()]);
        let mut ok = MemorySource::new("a.csv", Some(["ts", "amount", "customer"]), vec![row("1")]);
        assert_eq!(ingestor.ingest_source(&mut ok).unwrap().inserted, 1);

        let mut default_header = source("b.csv", vec![row("1")]);
        assert_eq!(
            ingestor.ingest_source(&mut default_header).unwrap().status,
            LedgerStatus::SkippedBadHeader
        );
    }

    #[test]
    fn rows_matching_a_wider_header_are_dropped() {
        let store = SqliteLayerStore::in_memory().unwrap();
        let header = ["timestamp", "price", "user_id", "note"];
        let ingestor = Ingestor::new(&store, 5)
            .with_expected_header(header.iter().map(ToString::to_string).collect());
        let mut src = MemorySource::new(
            "wide.csv",
            Some(header),
            vec![vec!["2024-03-01T10:00:00Z", "1.00", "7", "hello"]],
        );

        let outcome = ingestor.ingest_source(&mut src).unwrap();
        assert_eq!(outcome.status, LedgerStatus::EmptyFile);
        assert_eq!(outcome.rows_read, 1);
        assert_eq!(outcome.rows_dropped, 1);
        assert_eq!(store.layer_counts().unwrap().raw, 0);
    }

    #[test]
    fn excluded_sources_are_skipped_without_ledger_entry() {
        let store = SqliteLayerStore::in_memory().unwrap();
        let ingestor = Ingestor::new(&store, 5);
        let mut sources = vec![
            source("a.csv", vec![row("1")]),
            source("validation.csv", vec![row("99")]),
        ];

        let report = ingest_sources(&ingestor, &mut sources, &["validation.csv".to_string()])
            .unwrap();
        assert_eq!(report.inserted(), 1);
        assert_eq!(report.excluded, vec![SourceLabel::new("validation.csv")]);
        assert!(report.outcome("validation.csv").is_none());
        assert_eq!(store.ledger_entries().unwrap().len(), 1);
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let store = SqliteLayerStore::in_memory().unwrap();
        let ingestor = Ingestor::new(&store, 0);
        assert_eq!(ingestor.chunk_size(), 1);
        let outcome = ingestor
            .ingest_source(&mut source("a.csv", vec![row("1"), row("2")]))
            .unwrap();
        assert_eq!(outcome.inserted, 2);
    }
}
