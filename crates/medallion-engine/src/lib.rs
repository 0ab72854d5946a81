//! Incremental RAW -> SILVER -> GOLD materialization engine.
//!
//! Each stage consumes only what the next layer has not yet seen (an
//! anti-join for SILVER, a watermark for GOLD) and commits in bounded
//! chunks, so any stage may be killed and re-run at any point.

pub mod aggregate;
pub mod coerce;
pub mod config;
pub mod errors;
pub mod ingest;
pub mod ledger;
pub mod orchestrator;
pub mod result;
pub mod source;
pub mod transform;

// Re-export public API for convenience
pub use aggregate::Aggregator;
pub use config::{ChunkSize, PipelineConfig, StageSelection};
pub use errors::PipelineError;
pub use ingest::{ingest_sources, Ingestor};
pub use orchestrator::{
    compare_source, open_store, pipeline_status, run_layers, run_pipeline, PipelineStatus,
    SourceComparison,
};
pub use result::{
    AggregateReport, IngestOutcome, IngestReport, PipelineRun, StageReport, TransformReport,
};
pub use source::{discover_sources, CsvSource, MemorySource, RecordSource};
pub use transform::Transformer;
