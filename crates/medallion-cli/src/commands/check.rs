use anyhow::Result;

use medallion_engine::{open_store, pipeline_status};

use super::{print_stats, Settings};

/// Execute the `check` command: print layer counts and the aggregate.
pub fn execute(settings: &Settings) -> Result<()> {
    let config = settings.resolve(|_| {})?;
    let store = open_store(&config.state)?;
    let status = pipeline_status(store.as_ref())?;

    println!("Layer counts:");
    println!("  raw:    {}", status.counts.raw);
    println!("  typed:  {}", status.counts.typed);
    println!("  ledger: {}", status.counts.ledger);

    let aggregate = &status.aggregate;
    println!("Aggregate (watermark {}):", aggregate.watermark);
    print_stats("  ", &aggregate.stats);
    println!(
        "  updated: {}",
        aggregate.updated_at.format("%Y-%m-%d %H:%M:%S")
    );

    let pending_gold = status.counts.typed.saturating_sub(aggregate.stats.count);
    if status.counts.raw > status.counts.typed || pending_gold > 0 {
        println!(
            "Pending: {} raw row(s) untyped, {} typed row(s) unaggregated",
            status.counts.raw.saturating_sub(status.counts.typed),
            pending_gold
        );
    }
    Ok(())
}
