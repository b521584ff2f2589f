//! `strata materialize` - run the Silver catch-up loop.

use clap::Args;

use strata_pipeline::{JobConfig, MaterializationOutcome, SilverMaterializationJob};

use crate::CommandStatus;

/// Arguments for the materialize command.
#[derive(Debug, Args)]
pub struct MaterializeArgs {
    /// Upper bound on catch-up passes for this run.
    #[arg(long, default_value_t = strata_pipeline::config::DEFAULT_MAX_PASSES)]
    pub max_passes: u32,

    /// Whether to discover work through the manifest pointer log; when
    /// false every pass uses the brute-force tier diff.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub manifest_discovery: bool,

    /// Concurrent per-symbol materializations within one pass.
    #[arg(long, default_value_t = strata_pipeline::config::DEFAULT_APPLY_CONCURRENCY)]
    pub apply_concurrency: usize,
}

/// Runs the materialization job.
///
/// # Errors
///
/// Returns an error for configuration problems or storage failures; lock
/// contention and exhausted pass budgets are statuses, not errors.
pub async fn execute(
    args: MaterializeArgs,
    config: JobConfig,
    data_dir: &std::path::Path,
) -> anyhow::Result<CommandStatus> {
    let config = config
        .with_max_passes(args.max_passes)
        .with_manifest_discovery(args.manifest_discovery)
        .with_apply_concurrency(args.apply_concurrency);

    let store = super::open_store(data_dir)?;
    let job = SilverMaterializationJob::new(store, config);

    match job.run().await? {
        MaterializationOutcome::Converged { passes, applied } => {
            println!("converged after {passes} pass(es), applied {applied} symbol(s)");
            Ok(CommandStatus::Clean)
        }
        MaterializationOutcome::Deferred { passes } => {
            println!("deferred after {passes} pass(es): a concurrent instance is progressing");
            Ok(CommandStatus::Clean)
        }
        MaterializationOutcome::PartialConvergence { passes, remaining } => {
            println!(
                "partial convergence: {remaining} symbol(s) still behind after {passes} pass(es)"
            );
            Ok(CommandStatus::StillBehind)
        }
    }
}
