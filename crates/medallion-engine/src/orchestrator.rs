//! Pipeline orchestrator: opens the layer store and runs the selected stages
//! in RAW, SILVER, GOLD order.

use anyhow::{Context, Result as AnyResult};
use medallion_state::{LayerCounts, LayerStore, PostgresLayerStore, ScanScope, SqliteLayerStore};
use medallion_types::{Aggregate, Amount, AmountStats, Layer, SourceLabel};

use crate::aggregate::Aggregator;
use crate::config::types::{PipelineConfig, StateBackendKind, StateConfig};
use crate::errors::Result;
use crate::ingest::{ingest_sources, Ingestor};
use crate::result::PipelineRun;
use crate::source::discover_sources;
use crate::transform::Transformer;

/// Open the configured layer store, creating its tables if needed.
///
/// # Errors
///
/// Returns an error if the database can't be opened or bootstrapped.
pub fn open_store(config: &StateConfig) -> AnyResult<Box<dyn LayerStore>> {
    match config.backend {
        StateBackendKind::Sqlite => {
            let path = config.sqlite_path();
            let store = SqliteLayerStore::open(&path)
                .with_context(|| format!("Failed to open layer store at {}", path.display()))?;
            tracing::debug!(path = %path.display(), "Opened SQLite layer store");
            Ok(Box::new(store))
        }
        StateBackendKind::Postgres => {
            let connstr = config
                .connection
                .as_deref()
                .context("postgres backend requires a connection string")?;
            let store = PostgresLayerStore::open(connstr)
                .context("Failed to open Postgres layer store")?;
            tracing::debug!("Opened Postgres layer store");
            Ok(Box::new(store))
        }
    }
}

/// Run the stages selected by `config.stages`.
///
/// # Errors
///
/// Stops at the first failing stage; earlier stages stay committed.
pub fn run_pipeline(store: &dyn LayerStore, config: &PipelineConfig) -> Result<PipelineRun> {
    run_layers(store, config, config.stages.layers())
}

/// Run exactly `layers`, each at most once, in pipeline order.
///
/// # Errors
///
/// Stops at the first failing stage; earlier stages stay committed.
pub fn run_layers(
    store: &dyn LayerStore,
    config: &PipelineConfig,
    layers: &[Layer],
) -> Result<PipelineRun> {
    let chunk_size = config.chunk_size.resolve();
    tracing::info!(
        chunk_size,
        layers = ?layers.iter().map(|l| l.as_str()).collect::<Vec<_>>(),
        "Starting pipeline run"
    );

    let mut run = PipelineRun::default();
    for layer in [Layer::Raw, Layer::Silver, Layer::Gold] {
        if !layers.contains(&layer) {
            continue;
        }
        match layer {
            Layer::Raw => {
                let mut sources =
                    discover_sources(&config.source.data_dir, &config.source.extension)?;
                let ingestor = Ingestor::new(store, chunk_size)
                    .with_expected_header(config.source.expected_header.clone());
                run.ingest = Some(ingest_sources(
                    &ingestor,
                    &mut sources,
                    &config.source.exclude,
                )?);
            }
            Layer::Silver => {
                run.transform = Some(Transformer::new(store, chunk_size).run()?);
            }
            Layer::Gold => {
                run.aggregate = Some(Aggregator::new(store, chunk_size).run()?);
            }
        }
    }
    Ok(run)
}

// ---------------------------------------------------------------------------
// Read-only reporting queries
// ---------------------------------------------------------------------------

/// Layer row counts plus the stored aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStatus {
    pub counts: LayerCounts,
    pub aggregate: Aggregate,
}

/// Read layer counts and the aggregate without mutating anything.
///
/// # Errors
///
/// Returns an error if the store can't be read.
pub fn pipeline_status(store: &dyn LayerStore) -> Result<PipelineStatus> {
    Ok(PipelineStatus {
        counts: store.layer_counts()?,
        aggregate: store.load_aggregate()?,
    })
}

/// Full-scan typed statistics with and without one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceComparison {
    pub source: SourceLabel,
    pub without: AmountStats,
    pub only: AmountStats,
    pub total: AmountStats,
}

impl SourceComparison {
    /// Rows the source adds to the typed layer.
    #[must_use]
    pub fn delta_count(&self) -> u64 {
        self.total.count.saturating_sub(self.without.count)
    }

    /// Shift in average from including the source; absent if either side
    /// has no rows.
    #[must_use]
    pub fn delta_avg(&self) -> Option<Amount> {
        shift(self.without.average().as_ref(), self.total.average().as_ref())
    }

    #[must_use]
    pub fn delta_min(&self) -> Option<Amount> {
        shift(self.without.min.as_ref(), self.total.min.as_ref())
    }

    #[must_use]
    pub fn delta_max(&self) -> Option<Amount> {
        shift(self.without.max.as_ref(), self.total.max.as_ref())
    }
}

fn shift(before: Option<&Amount>, after: Option<&Amount>) -> Option<Amount> {
    Some(after?.delta(before?))
}

/// Compare typed-layer statistics excluding, restricted to, and including
/// `source`.
///
/// # Errors
///
/// Returns an error if the store can't be read.
pub fn compare_source(store: &dyn LayerStore, source: &SourceLabel) -> Result<SourceComparison> {
    Ok(SourceComparison {
        source: source.clone(),
        without: store.typed_stats(&ScanScope::ExcludingSource(source.clone()))?,
        only: store.typed_stats(&ScanScope::OnlySource(source.clone()))?,
        total: store.typed_stats(&ScanScope::All)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ChunkSize, SourceConfig, StageSelection};
    use crate::errors::PipelineError;
    use medallion_types::LedgerStatus;

    fn write_csv(dir: &std::path::Path, name: &str, rows: &[&str]) {
        let mut body = String::from("timestamp,price,user_id\n");
        for row in rows {
            body.push_str(row);
            body.push('\n');
        }
        std::fs::write(dir.join(name), body).unwrap();
    }

    fn config_for(dir: &std::path::Path, stages: StageSelection) -> PipelineConfig {
        PipelineConfig {
            source: SourceConfig {
                data_dir: dir.to_path_buf(),
                ..SourceConfig::default()
            },
            chunk_size: ChunkSize::Fixed(2),
            stages,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn silver_selection_runs_raw_then_silver() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "a.csv", &["2024-03-01T10:00:00Z,1.00,1"]);
        let store = SqliteLayerStore::in_memory().unwrap();

        let run = run_pipeline(&store, &config_for(dir.path(), StageSelection::Silver)).unwrap();
        assert!(run.ingest.is_some());
        assert!(run.transform.is_some());
        assert!(run.aggregate.is_none());

        let status = pipeline_status(&store).unwrap();
        assert_eq!(status.counts.raw, 1);
        assert_eq!(status.counts.typed, 1);
        assert_eq!(status.aggregate.stats.count, 0);
    }

    #[test]
    fn gold_selection_does_not_touch_sources() {
        let store = SqliteLayerStore::in_memory().unwrap();
        let config = config_for(std::path::Path::new("/nonexistent/dir"), StageSelection::Gold);
        let run = run_pipeline(&store, &config).unwrap();
        assert!(run.ingest.is_none());
        assert_eq!(
            run.aggregate.unwrap().stage.status,
            LedgerStatus::NoNewRows
        );
    }

    #[test]
    fn raw_stage_with_missing_directory_fails() {
        let store = SqliteLayerStore::in_memory().unwrap();
        let config = config_for(std::path::Path::new("/nonexistent/dir"), StageSelection::Raw);
        let err = run_pipeline(&store, &config).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn layers_run_in_pipeline_order_regardless_of_argument_order() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            dir.path(),
            "a.csv",
            &["2024-03-01T10:00:00Z,1.00,1", "2024-03-01T10:00:00Z,3.00,2"],
        );
        let store = SqliteLayerStore::in_memory().unwrap();
        let config = config_for(dir.path(), StageSelection::All);
        let run = run_layers(&store, &config, &[Layer::Gold, Layer::Raw, Layer::Silver]).unwrap();
        assert_eq!(run.aggregate.unwrap().after.stats.count, 2);
    }

    #[test]
    fn compare_source_splits_statistics() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "a.csv", &["2024-03-01T10:00:00Z,2.00,1"]);
        write_csv(dir.path(), "validation.csv", &["2024-03-01T10:00:00Z,8.00,1"]);
        let store = SqliteLayerStore::in_memory().unwrap();
        run_pipeline(&store, &config_for(dir.path(), StageSelection::All)).unwrap();

        let cmp = compare_source(&store, &SourceLabel::new("validation.csv")).unwrap();
        assert_eq!(cmp.without.count, 1);
        assert_eq!(cmp.only.count, 1);
        assert_eq!(cmp.total.count, 2);
        assert_eq!(cmp.total.average().unwrap().to_string(), "5.00");
        assert_eq!(cmp.delta_count(), 1);
        assert_eq!(cmp.delta_avg().unwrap().to_string(), "3.00");
        assert_eq!(cmp.delta_min().unwrap().to_string(), "0.00");
        assert_eq!(cmp.delta_max().unwrap().to_string(), "6.00");
    }

    #[test]
    fn compare_deltas_are_absent_without_a_baseline() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "validation.csv", &["2024-03-01T10:00:00Z,8.00,1"]);
        let store = SqliteLayerStore::in_memory().unwrap();
        run_pipeline(&store, &config_for(dir.path(), StageSelection::All)).unwrap();

        let cmp = compare_source(&store, &SourceLabel::new("validation.csv")).unwrap();
        assert!(cmp.without.is_empty());
        assert_eq!(cmp.delta_count(), 1);
        assert_eq!(cmp.delta_avg(), None);
        assert_eq!(cmp.delta_min(), None);
        assert_eq!(cmp.delta_max(), None);
    }

    #[test]
    fn open_store_creates_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("layers.db");
        let config = StateConfig {
            backend: StateBackendKind::Sqlite,
            path: Some(path.clone()),
            connection: None,
        };
        let store = open_store(&config).unwrap();
        assert_eq!(store.layer_counts().unwrap(), LayerCounts::default());
        assert!(path.exists());
    }

    #[test]
    fn open_store_postgres_without_connection_errors() {
        let config = StateConfig {
            backend: StateBackendKind::Postgres,
            path: None,
            connection: None,
        };
        assert!(open_store(&config).is_err());
    }
}
