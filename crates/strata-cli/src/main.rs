//! Strata CLI - entry point for the batch job binaries.

use std::process::ExitCode;

use clap::Parser;

use strata_cli::{Cli, Commands, commands};
use strata_core::observability::init_logging;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format());

    let config = match cli.job_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let data_dir = cli.data_dir.clone();
    let result = runtime.block_on(async {
        match cli.command {
            Commands::Ingest(args) => commands::ingest::execute(args, config, &data_dir).await,
            Commands::Materialize(args) => {
                commands::materialize::execute(args, config, &data_dir).await
            }
            Commands::Reconcile(args) => {
                commands::reconcile::execute(args, config, &data_dir).await
            }
        }
    });

    match result {
        Ok(status) => status.exit_code(),
        Err(e) => {
            tracing::error!(error = %e, "job failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
