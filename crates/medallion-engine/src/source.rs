//! Record sources: where raw rows come from.
//!
//! A source yields its header line once, then data rows in order. The
//! ingest driver checks the header; the [`Ingestor`](crate::ingest::Ingestor)
//! only ever sees data rows.

use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{Reader, ReaderBuilder, StringRecord};
use medallion_types::SourceLabel;

use crate::errors::{PipelineError, Result};

/// An ordered, finite sequence of raw rows with a label and a header.
pub trait RecordSource {
    /// Label stored with every row (the file name for CSV sources).
    fn label(&self) -> &SourceLabel;

    /// Header fields, or `None` when the source has no lines at all.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Source`] if the source can't be read.
    fn header(&mut self) -> Result<Option<Vec<String>>>;

    /// Next data row, or `None` once the source is exhausted.
    ///
    /// Rows are returned with whatever arity they have; shape checks
    /// belong to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Source`] if the source can't be read.
    fn next_row(&mut self) -> Result<Option<Vec<String>>>;
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// CSV file source. Rows of any width are accepted.
pub struct CsvSource {
    label: SourceLabel,
    reader: Reader<File>,
    record: StringRecord,
    header: Option<Option<Vec<String>>>,
}

impl CsvSource {
    /// Open `path` for reading. The label is the file name.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Source`] if the file can't be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let label = SourceLabel::new(
            path.file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned()),
        );
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| PipelineError::unreadable(&label, e))?;
        Ok(Self {
            label,
            reader,
            record: StringRecord::new(),
            header: None,
        })
    }

    fn read_record(&mut self) -> Result<Option<Vec<String>>> {
        let more = self
            .reader
            .read_record(&mut self.record)
            .map_err(|e| PipelineError::unreadable(&self.label, e))?;
        Ok(more.then(|| self.record.iter().map(str::to_string).collect()))
    }
}

impl RecordSource for CsvSource {
    fn label(&self) -> &SourceLabel {
        &self.label
    }

    fn header(&mut self) -> Result<Option<Vec<String>>> {
        if self.header.is_none() {
            let mut first = self.read_record()?;
            // A UTF-8 byte order mark is not part of the first column name.
            if let Some(name) = first.as_mut().and_then(|fields| fields.first_mut()) {
                if let Some(stripped) = name.strip_prefix('\u{feff}') {
                    *name = stripped.to_string();
                }
            }
            self.header = Some(first);
        }
        Ok(self.header.clone().flatten())
    }

    fn next_row(&mut self) -> Result<Option<Vec<String>>> {
        if self.header.is_none() {
            self.header()?;
        }
        self.read_record()
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Source backed by rows held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    label: SourceLabel,
    header: Option<Vec<String>>,
    rows: VecDeque<Vec<String>>,
}

impl MemorySource {
    #[must_use]
    pub fn new<H, R, F>(label: impl Into<SourceLabel>, header: Option<H>, rows: R) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        R: IntoIterator<Item = F>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            label: label.into(),
            header: header.map(|h| h.into_iter().map(Into::into).collect()),
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        }
    }
}

impl RecordSource for MemorySource {
    fn label(&self) -> &SourceLabel {
        &self.label
    }

    fn header(&mut self) -> Result<Option<Vec<String>>> {
        Ok(self.header.clone())
    }

    fn next_row(&mut self) -> Result<Option<Vec<String>>> {
        Ok(self.rows.pop_front())
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Regular files in `dir` whose extension equals `extension`, sorted by name.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] if `dir` doesn't exist or can't be
/// listed, and [`PipelineError::Source`] if a matching file can't be opened.
pub fn discover_sources(dir: &Path, extension: &str) -> Result<Vec<CsvSource>> {
    if !dir.is_dir() {
        return Err(PipelineError::Config(format!(
            "data directory not found: {}",
            dir.display()
        )));
    }
    let entries = std::fs::read_dir(dir).map_err(|e| {
        PipelineError::Config(format!("cannot list data directory {}: {e}", dir.display()))
    })?;

    let wanted = extension.trim_start_matches('.');
    let mut paths: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == wanted))
        .collect();
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    tracing::debug!(dir = %dir.display(), count = paths.len(), "Discovered sources");
    paths.iter().map(|p| CsvSource::open(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn csv_source_splits_header_from_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "events.csv",
            "timestamp,price,user_id\n2024-03-01T10:00:00Z,1.50,7\nshort,row\n",
        );
        let mut source = CsvSource::open(&path).unwrap();
        assert_eq!(source.label().as_str(), "events.csv");
        assert_eq!(
            source.header().unwrap().unwrap(),
            vec!["timestamp", "price", "user_id"]
        );
        assert_eq!(source.next_row().unwrap().unwrap().len(), 3);
        assert_eq!(source.next_row().unwrap().unwrap(), vec!["short", "row"]);
        assert!(source.next_row().unwrap().is_none());
    }

    #[test]
    fn next_row_without_header_call_still_skips_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "a.csv", "a,b\n1,2\n");
        let mut source = CsvSource::open(&path).unwrap();
        assert_eq!(source.next_row().unwrap().unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn empty_file_has_no_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "empty.csv", "");
        let mut source = CsvSource::open(&path).unwrap();
        assert!(source.header().unwrap().is_none());
        assert!(source.next_row().unwrap().is_none());
    }

    #[test]
    fn byte_order_mark_is_stripped_from_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bom.csv", "\u{feff}timestamp,price,user_id\n");
        let mut source = CsvSource::open(&path).unwrap();
        assert_eq!(source.header().unwrap().unwrap()[0], "timestamp");
    }

    #[test]
    fn discovery_filters_by_extension_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.csv", "x\n");
        write(dir.path(), "a.csv", "x\n");
        write(dir.path(), "notes.txt", "x\n");
        std::fs::create_dir(dir.path().join("nested.csv")).unwrap();

        let sources = discover_sources(dir.path(), "csv").unwrap();
        let labels: Vec<&str> = sources.iter().map(|s| s.label().as_str()).collect();
        assert_eq!(labels, vec!["a.csv", "b.csv"]);

        let dotted = discover_sources(dir.path(), ".txt").unwrap();
        assert_eq!(dotted.len(), 1);
    }

    #[test]
    fn missing_directory_is_a_config_error() {
        let err = discover_sources(Path::new("/nonexistent/medallion/data"), "csv")
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn memory_source_yields_rows_in_order() {
        let mut source = MemorySource::new(
            "mem",
            Some(["timestamp", "price", "user_id"]),
            vec![vec!["a", "1", "2"], vec!["b", "3", "4"]],
        );
        assert_eq!(source.header().unwrap().unwrap().len(), 3);
        assert_eq!(source.next_row().unwrap().unwrap()[0], "a");
        assert_eq!(source.next_row().unwrap().unwrap()[0], "b");
        assert!(source.next_row().unwrap().is_none());
    }
}
