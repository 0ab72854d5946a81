use std::path::PathBuf;

use anyhow::Result;

use medallion_engine::config::types::parse_excludes;
use medallion_engine::{
    open_store, run_layers, AggregateReport, ChunkSize, IngestReport, PipelineConfig,
    StageSelection, TransformReport,
};
use medallion_types::Layer;

use super::{amount_or_na, print_stats, Settings};

/// Source and chunking overrides accepted by the load commands.
#[derive(clap::Args, Debug, Default)]
pub struct LoadArgs {
    /// Directory to scan for source files
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Source file extension (without the dot)
    #[arg(long)]
    pub extension: Option<String>,
    /// Source file names to skip; repeatable and/or comma-separated.
    /// Nothing is excluded by default
    #[arg(long)]
    pub exclude: Vec<String>,
    /// Rows per committed chunk ("auto" or a count)
    #[arg(long)]
    pub chunk_size: Option<ChunkSize>,
}

impl LoadArgs {
    pub fn with_chunk_size(chunk_size: Option<ChunkSize>) -> Self {
        Self {
            chunk_size,
            ..Self::default()
        }
    }

    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.data_dir {
            config.source.data_dir.clone_from(dir);
        }
        if let Some(ext) = &self.extension {
            config.source.extension = ext.trim_start_matches('.').to_string();
        }
        if !self.exclude.is_empty() {
            let mut all = config.source.exclude.clone();
            all.extend(self.exclude.iter().cloned());
            config.source.exclude = parse_excludes(&all);
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
    }
}

/// Execute the `load` command for a stage selection.
pub fn execute(settings: &Settings, stage: StageSelection, args: &LoadArgs) -> Result<()> {
    execute_layers(settings, stage.layers(), args)
}

/// Run exactly `layers` and print a summary per stage.
pub fn execute_layers(settings: &Settings, layers: &[Layer], args: &LoadArgs) -> Result<()> {
    let config = settings.resolve(|config| args.apply(config))?;
    let store = open_store(&config.state)?;

    tracing::info!(
        chunk_size = %config.chunk_size,
        data_dir = %config.source.data_dir.display(),
        "Load started"
    );

    let run = run_layers(store.as_ref(), &config, layers)?;

    if let Some(report) = &run.ingest {
        print_ingest(report);
    }
    if let Some(report) = &run.transform {
        print_transform(report);
    }
    if let Some(report) = &run.aggregate {
        print_aggregate(report);
    }
    Ok(())
}

fn print_ingest(report: &IngestReport) {
    println!("RAW");
    for label in &report.excluded {
        println!("  {label}: excluded");
    }
    for outcome in &report.sources {
        println!(
            "  {}: {} (read {}, inserted {}, dropped {})",
            outcome.source, outcome.status, outcome.rows_read, outcome.inserted, outcome.rows_dropped
        );
    }
    if report.sources.is_empty() && report.excluded.is_empty() {
        println!("  no source files found");
    }
    println!("  total inserted: {}", report.inserted());
    print_stats("  ", &report.stats());
}

fn print_transform(report: &TransformReport) {
    println!("SILVER");
    println!(
        "  {}: {} ({} rows in {} chunk(s) of {}, {} coerced)",
        report.stage.subject,
        report.stage.status,
        report.stage.records,
        report.stage.chunks,
        report.stage.chunk_size,
        report.coerced
    );
    print_stats("  ", &report.stage.stats);
}

fn print_aggregate(report: &AggregateReport) {
    println!("GOLD");
    println!(
        "  {}: {} ({} rows in {} chunk(s) of {}, watermark {} -> {})",
        report.stage.subject,
        report.stage.status,
        report.stage.records,
        report.stage.chunks,
        report.stage.chunk_size,
        report.before.watermark,
        report.after.watermark
    );
    print_stats("  ", &report.after.stats);
    println!("  \u{0394}count: +{}", report.delta_count());
    println!("  \u{0394}avg:   {}", report.delta_avg());
    println!(
        "  \u{0394}min:   {}",
        amount_or_na(report.delta_min().as_ref())
    );
    println!(
        "  \u{0394}max:   {}",
        amount_or_na(report.delta_max().as_ref())
    );
}
