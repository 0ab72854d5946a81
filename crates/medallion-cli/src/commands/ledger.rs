use anyhow::{Context, Result};

use medallion_engine::open_store;
use medallion_types::LedgerRecord;

use super::{amount_or_na, Settings};

/// Execute the `ledger` command: print entries in write order.
pub fn execute(settings: &Settings, json: bool) -> Result<()> {
    let config = settings.resolve(|_| {})?;
    let store = open_store(&config.state)?;
    let records = store.ledger_entries()?;

    if json {
        for record in &records {
            let line =
                serde_json::to_string(record).context("Failed to serialize ledger entry")?;
            println!("{line}");
        }
        return Ok(());
    }

    if records.is_empty() {
        println!("Ledger is empty.");
        return Ok(());
    }

    println!(
        "{:>4}  {:19}  {:6}  {:24}  {:>7}  {:>10}  {:>10}  {:>10}  {:>5}  {}",
        "id", "recorded", "layer", "subject", "records", "min", "avg", "max", "chunk", "status"
    );
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn print_record(record: &LedgerRecord) {
    let entry = &record.entry;
    println!(
        "{:>4}  {:19}  {:6}  {:24}  {:>7}  {:>10}  {:>10}  {:>10}  {:>5}  {}",
        record.id,
        record.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        entry.layer.as_str(),
        entry.subject,
        entry.records,
        amount_or_na(entry.min.as_ref()),
        amount_or_na(entry.avg.as_ref()),
        amount_or_na(entry.max.as_ref()),
        entry.chunk_size,
        entry.status,
    );
    if let Some(detail) = &entry.detail {
        println!("      {detail}");
    }
}
