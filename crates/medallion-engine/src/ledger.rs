//! Batch ledger writer.
//!
//! Every stage closes its unit of work with exactly one append here.

use medallion_state::LayerStore;
use medallion_types::LedgerEntry;

use crate::errors::Result;

/// Append `entry` to the ledger and log it. Returns the entry id.
///
/// # Errors
///
/// Returns [`PipelineError::State`](crate::PipelineError::State) if the
/// append fails.
pub fn record(store: &dyn LayerStore, entry: &LedgerEntry) -> Result<i64> {
    let id = store.append_ledger(entry)?;
    tracing::debug!(
        id,
        layer = %entry.layer,
        subject = entry.subject.as_str(),
        records = entry.records,
        status = %entry.status,
        "Ledger entry recorded"
    );
    Ok(id)
}
