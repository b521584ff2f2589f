//! # strata-pipeline
//!
//! The Bronze→Silver coordination core of the Strata medallion platform.
//!
//! Two independently scheduled batch jobs write to a shared durable store
//! with no central transaction coordinator:
//!
//! - [`BronzeIngestionJob`] writes raw per-symbol records and publishes a
//!   [`RunManifest`] describing exactly what it durably committed.
//! - [`SilverMaterializationJob`] discovers outstanding work (manifest
//!   pointer log or brute-force tier diff), applies it under the shared
//!   lock, acknowledges the consumed manifest, and repeats for a bounded
//!   number of passes until converged.
//!
//! The protocol is at-least-once and eventually convergent: every mutation
//! is idempotent at (symbol, run) granularity, so crashes and concurrent
//! instances degrade to harmless re-attempts. [`ReconciliationReporter`]
//! audits the resulting symbol coverage without participating in
//! correctness enforcement.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod bronze;
pub mod config;
pub mod error;
pub mod manifest;
pub mod reconcile;
pub mod silver;
pub mod source;
pub mod tier;

pub use bronze::{BronzeIngestionJob, IngestOutcome, IngestReport, SkippedSymbol};
pub use config::JobConfig;
pub use error::{PipelineError, Result};
pub use manifest::{AckOutcome, Acknowledgement, ManifestStore, RunManifest};
pub use reconcile::{ReconciliationReport, ReconciliationReporter};
pub use silver::{MaterializationOutcome, SilverMaterializationJob};
pub use source::{FetchOutcome, JsonFileSource, MarketDataSource, StaticSource};
pub use tier::{Bar, BronzeRecord, SeriesRow, SilverRecord, TierStore, derive_silver};
