use anyhow::Result;

use medallion_engine::config::types::StateBackendKind;
use medallion_engine::{open_store, pipeline_status};

use super::Settings;

/// Execute the `init` command: bootstrap the layer tables.
pub fn execute(settings: &Settings) -> Result<()> {
    let config = settings.resolve(|_| {})?;
    let store = open_store(&config.state)?;
    let status = pipeline_status(store.as_ref())?;

    match config.state.backend {
        StateBackendKind::Sqlite => println!(
            "Layer store ready: sqlite at {}",
            config.state.sqlite_path().display()
        ),
        StateBackendKind::Postgres => println!("Layer store ready: postgres"),
    }
    println!(
        "  raw: {}  typed: {}  ledger: {}  watermark: {}",
        status.counts.raw, status.counts.typed, status.counts.ledger, status.aggregate.watermark
    );
    Ok(())
}
