mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use medallion_engine::{ChunkSize, PipelineError, StageSelection};
use medallion_types::Layer;

use commands::load::LoadArgs;
use commands::Settings;

#[derive(Parser)]
#[command(
    name = "medallion",
    version,
    about = "Incremental RAW -> SILVER -> GOLD materialization"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Path to pipeline YAML file (environment defaults when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path, overriding config and environment
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// PostgreSQL connection string; selects the postgres backend
    #[arg(long, global = true)]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the layer tables and the aggregate row if missing
    Init,
    /// Run pipeline stages
    Load {
        /// Stages to run: raw, silver (raw then silver), gold, or all
        #[arg(long, default_value = "all")]
        stage: StageSelection,
        #[command(flatten)]
        args: LoadArgs,
    },
    /// Ingest source files into the raw layer
    LoadRaw {
        #[command(flatten)]
        args: LoadArgs,
    },
    /// Type pending raw records
    RawToSilver {
        /// Rows per committed chunk ("auto" or a count)
        #[arg(long)]
        chunk_size: Option<ChunkSize>,
    },
    /// Fold new typed records into the aggregate
    SilverToGold {
        /// Rows per committed chunk ("auto" or a count)
        #[arg(long)]
        chunk_size: Option<ChunkSize>,
    },
    /// Print layer row counts and the aggregate
    Check,
    /// Print the batch ledger in write order
    Ledger {
        /// Emit one JSON object per entry
        #[arg(long)]
        json: bool,
    },
    /// Compare typed statistics with and without one source
    Compare {
        /// Source label (file name), e.g. validation.csv
        #[arg(long)]
        source: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let settings = Settings {
        config: cli.config,
        db: cli.db,
        database_url: cli.database_url,
    };

    let result = match cli.command {
        Commands::Init => commands::init::execute(&settings),
        Commands::Load { stage, args } => commands::load::execute(&settings, stage, &args),
        Commands::LoadRaw { args } => {
            commands::load::execute_layers(&settings, &[Layer::Raw], &args)
        }
        Commands::RawToSilver { chunk_size } => commands::load::execute_layers(
            &settings,
            &[Layer::Silver],
            &LoadArgs::with_chunk_size(chunk_size),
        ),
        Commands::SilverToGold { chunk_size } => commands::load::execute_layers(
            &settings,
            &[Layer::Gold],
            &LoadArgs::with_chunk_size(chunk_size),
        ),
        Commands::Check => commands::check::execute(&settings),
        Commands::Ledger { json } => commands::ledger::execute(&settings, json),
        Commands::Compare { source } => commands::compare::execute(&settings, &source),
    };

    if let Err(err) = &result {
        if err
            .downcast_ref::<PipelineError>()
            .is_some_and(PipelineError::is_persistence)
        {
            tracing::error!(
                "Stage stopped on a store failure; committed chunks are kept, re-run to resume"
            );
        }
    }
    result
}
