use anyhow::Result;

use medallion_engine::{compare_source, open_store};
use medallion_types::{AmountStats, SourceLabel};

use super::{amount_or_na, Settings};

/// Execute the `compare` command: typed statistics without, only, and
/// including one source.
pub fn execute(settings: &Settings, source: &str) -> Result<()> {
    let config = settings.resolve(|_| {})?;
    let store = open_store(&config.state)?;
    let cmp = compare_source(store.as_ref(), &SourceLabel::new(source))?;

    if cmp.only.is_empty() {
        println!("No typed rows from {}.", cmp.source);
    }

    println!(
        "{:12}  {:>7}  {:>10}  {:>10}  {:>10}",
        "scope", "count", "avg", "min", "max"
    );
    print_row("without", &cmp.without);
    print_row("only", &cmp.only);
    print_row("total", &cmp.total);

    println!("Deltas (total - without):");
    println!("  \u{0394}count: +{}", cmp.delta_count());
    println!("  \u{0394}avg:   {}", amount_or_na(cmp.delta_avg().as_ref()));
    println!("  \u{0394}min:   {}", amount_or_na(cmp.delta_min().as_ref()));
    println!("  \u{0394}max:   {}", amount_or_na(cmp.delta_max().as_ref()));
    Ok(())
}

fn print_row(scope: &str, stats: &AmountStats) {
    println!(
        "{:12}  {:>7}  {:>10}  {:>10}  {:>10}",
        scope,
        stats.count,
        amount_or_na(stats.average().as_ref()),
        amount_or_na(stats.min.as_ref()),
        amount_or_na(stats.max.as_ref()),
    );
}
