//! # strata-cli
//!
//! Command-line interface for the Strata batch jobs.
//!
//! ## Commands
//!
//! - `strata ingest` - Run a Bronze ingestion batch from a staged drop
//! - `strata materialize` - Run the Silver catch-up loop
//! - `strata reconcile` - Audit Bronze/Silver symbol drift
//!
//! ## Exit codes
//!
//! Schedulers distinguish "try again later" from "investigate":
//!
//! - `0` - success, full convergence, or a clean deferral to a peer
//! - `2` - partial convergence: the pass budget ran out with lag remaining
//! - `1` - fatal error
//!
//! ## Configuration
//!
//! Flags fall back to environment variables (`STRATA_DATA_DIR`,
//! `STRATA_DOMAIN`), read once at startup and never refreshed mid-run.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]

pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

use strata_core::{Domain, LogFormat};
use strata_pipeline::JobConfig;

/// Exit code for partial convergence ("try again later").
pub const EXIT_STILL_BEHIND: u8 = 2;

/// Strata CLI - medallion batch jobs.
#[derive(Debug, Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Root directory of the durable store.
    #[arg(long, env = "STRATA_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Dataset domain to operate on.
    #[arg(long, env = "STRATA_DOMAIN")]
    pub domain: String,

    /// Override the shared cross-layer lock name.
    #[arg(long, env = "STRATA_CROSS_LOCK")]
    pub cross_lock: Option<String>,

    /// Override the per-domain ingest lock name.
    #[arg(long, env = "STRATA_INGEST_LOCK")]
    pub ingest_lock: Option<String>,

    /// Bounded wait for lock acquisition, in seconds.
    #[arg(long, default_value_t = 10)]
    pub lock_wait_secs: u64,

    /// Log output format.
    #[arg(long, default_value = "pretty")]
    pub log_format: LogFormatArg,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Builds the shared job configuration from the global flags.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid domain name.
    pub fn job_config(&self) -> anyhow::Result<JobConfig> {
        let domain = Domain::new(self.domain.clone())?;
        let mut config =
            JobConfig::new(domain).with_lock_wait(Duration::from_secs(self.lock_wait_secs));
        if let Some(name) = &self.cross_lock {
            config.cross_lock_name.clone_from(name);
        }
        if let Some(name) = &self.ingest_lock {
            config.ingest_lock_name.clone_from(name);
        }
        Ok(config)
    }

    /// Returns the selected log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        match self.log_format {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Pretty => LogFormat::Pretty,
        }
    }
}

/// Log format flag.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum LogFormatArg {
    /// Pretty-printed logs.
    #[default]
    Pretty,
    /// JSON structured logs.
    Json,
}

/// CLI subcommands, one per batch job.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a Bronze ingestion batch.
    Ingest(commands::ingest::IngestArgs),
    /// Run the Silver materialization catch-up loop.
    Materialize(commands::materialize::MaterializeArgs),
    /// Audit Bronze/Silver symbol coverage drift.
    Reconcile(commands::reconcile::ReconcileArgs),
}

/// Terminal status of a command, mapped onto the exit-code contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Success, convergence, or clean deferral.
    Clean,
    /// Partial convergence: lag remains for the next scheduled run.
    StillBehind,
}

impl CommandStatus {
    /// Returns the numeric exit code for this status.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Clean => 0,
            Self::StillBehind => EXIT_STILL_BEHIND,
        }
    }

    /// Maps the status to a process exit code.
    #[must_use]
    pub fn exit_code(self) -> ExitCode {
        ExitCode::from(self.code())
    }
}
