//! `strata ingest` - run a Bronze ingestion batch.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::Args;

use strata_core::Symbol;
use strata_pipeline::{BronzeIngestionJob, IngestOutcome, JobConfig, JsonFileSource};

use crate::CommandStatus;

/// Arguments for the ingest command.
#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Staged-drop JSON file mapping tickers to raw rows.
    #[arg(long)]
    pub input: PathBuf,

    /// Active symbol universe, comma-separated tickers.
    #[arg(long, value_delimiter = ',', required = true)]
    pub symbols: Vec<String>,

    /// Batch date (defaults to today, UTC).
    #[arg(long, value_parser = parse_as_of)]
    pub as_of: Option<NaiveDate>,
}

fn parse_as_of(raw: &str) -> Result<NaiveDate, String> {
    raw.parse()
        .map_err(|e| format!("invalid as-of date '{raw}': {e}"))
}

/// Runs the ingestion job.
///
/// # Errors
///
/// Returns an error for invalid symbols, an unreadable staged drop, or a
/// failed run (which publishes no manifest).
pub async fn execute(
    args: IngestArgs,
    config: JobConfig,
    data_dir: &std::path::Path,
) -> anyhow::Result<CommandStatus> {
    let universe = args
        .symbols
        .iter()
        .map(|t| Symbol::new(t.clone()))
        .collect::<strata_core::Result<Vec<_>>>()?;

    let mut config = config.with_universe(universe);
    if let Some(as_of) = args.as_of {
        config = config.with_as_of(as_of);
    }

    let store = super::open_store(data_dir)?;
    let source = Arc::new(JsonFileSource::load(&args.input)?);
    let job = BronzeIngestionJob::new(store, source, config);

    match job.run().await? {
        IngestOutcome::Committed(report) => {
            println!(
                "run {}: committed {} symbol(s), skipped {}",
                report.run_id,
                report.committed.len(),
                report.skipped.len()
            );
            for skip in &report.skipped {
                println!("  skipped {}: {}", skip.symbol, skip.reason);
            }
            Ok(CommandStatus::Clean)
        }
        IngestOutcome::Deferred => {
            println!("deferred: another ingestion run holds the domain");
            Ok(CommandStatus::Clean)
        }
    }
}
