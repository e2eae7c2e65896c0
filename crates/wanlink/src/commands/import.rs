//! `wanlink import`: load a circuit extract into the circuit store.

use tracing::info;
use wanlink_config::Config;
use wanlink_core::{CircuitTable, load_extract};

use super::store_layout;
use crate::cli::ImportArgs;
use crate::error::CliError;

pub fn handle(args: ImportArgs, config: &Config) -> Result<(), CliError> {
    let layout = store_layout(config, args.store_dir);
    let report = load_extract(&args.path)?;
    let circuits = CircuitTable::open(&layout.circuits())?;

    let stats = circuits.replace_extract(report.records);
    circuits.flush()?;

    info!(
        path = %args.path.display(),
        imported = stats.imported,
        replaced = stats.replaced,
        shadowed_by_manual = stats.shadowed_by_manual,
        manual_kept = stats.manual_kept,
        skipped = report.skipped,
        unreadable = report.unreadable,
        "circuit extract imported"
    );
    println!(
        "imported {} records ({} replaced, {} shadowed by manual overrides, {} rows skipped, {} unreadable)",
        stats.imported,
        stats.replaced,
        stats.shadowed_by_manual,
        report.skipped,
        report.unreadable
    );
    Ok(())
}
