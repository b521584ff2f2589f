//! `strata reconcile` - audit Bronze/Silver symbol drift.

use clap::Args;

use strata_pipeline::{JobConfig, ReconciliationReporter};

use crate::CommandStatus;

/// Arguments for the reconcile command.
#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Emit the full report as JSON instead of a summary line.
    #[arg(long)]
    pub json: bool,
}

/// Runs the reconciliation auditor.
///
/// Drift is operator information, not a failure: the command exits clean
/// whenever the report was produced.
///
/// # Errors
///
/// Returns an error if the tiers cannot be listed or the report cannot be
/// written.
pub async fn execute(
    args: ReconcileArgs,
    config: JobConfig,
    data_dir: &std::path::Path,
) -> anyhow::Result<CommandStatus> {
    let store = super::open_store(data_dir)?;
    let reporter = ReconciliationReporter::new(store);
    let report = reporter.run(&config.domain).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "domain {}: {} lagging, {} orphaned",
            report.domain, report.bronze_only_symbol_count, report.silver_only_symbol_count
        );
        for symbol in &report.bronze_only_symbols {
            println!("  lag: {symbol}");
        }
        for symbol in &report.silver_only_symbols {
            println!("  orphan: {symbol}");
        }
    }

    Ok(CommandStatus::Clean)
}
