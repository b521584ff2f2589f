//! Job configuration, read once at job start.
//!
//! Configuration comes from the invocation surface (flags and environment)
//! and is never refreshed mid-run: a job observes one consistent set of
//! feature flags, lock names, and wait bounds for its whole lifetime.

use std::time::Duration;

use chrono::{NaiveDate, Utc};

use strata_core::{Domain, Symbol};

use crate::error::{PipelineError, Result};

/// Default bound on catch-up passes per materialization run.
pub const DEFAULT_MAX_PASSES: u32 = 5;

/// Default bounded wait for lock acquisition.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(10);

/// Default lease TTL for the cross-layer lock.
pub const DEFAULT_CROSS_LOCK_TTL: Duration = Duration::from_secs(60);

/// Default lease TTL for the per-domain ingest lock.
///
/// Deliberately shorter than the cross-layer TTL: the ingest lock only
/// fences duplicate fetch work, so a crashed run should free the domain
/// sooner.
pub const DEFAULT_INGEST_LOCK_TTL: Duration = Duration::from_secs(30);

/// Default number of concurrent per-symbol materializations.
pub const DEFAULT_APPLY_CONCURRENCY: usize = 8;

/// Settings shared by the pipeline jobs for one domain.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Dataset domain the job operates on.
    pub domain: Domain,

    /// Active symbol universe for ingestion.
    pub universe: Vec<Symbol>,

    /// Batch date stamped on records written by this run.
    pub as_of: NaiveDate,

    /// Whether Silver discovers work through the manifest pointer log.
    /// When disabled it always falls back to the brute-force tier diff.
    pub manifest_discovery: bool,

    /// Upper bound on catch-up passes per materialization run.
    pub max_passes: u32,

    /// Name of the shared cross-layer lock.
    pub cross_lock_name: String,

    /// Name of the narrower per-domain ingest lock.
    pub ingest_lock_name: String,

    /// Bounded wait applied to every lock acquisition.
    pub lock_wait: Duration,

    /// Lease TTL of the cross-layer lock.
    pub cross_lock_ttl: Duration,

    /// Lease TTL of the ingest lock (shorter than the cross-layer TTL).
    pub ingest_lock_ttl: Duration,

    /// Concurrent per-symbol materializations within one pass.
    pub apply_concurrency: usize,
}

impl JobConfig {
    /// Creates a config with defaults for the given domain.
    #[must_use]
    pub fn new(domain: Domain) -> Self {
        let cross_lock_name = format!("cross-layer-{domain}");
        let ingest_lock_name = format!("bronze-ingest-{domain}");
        Self {
            domain,
            universe: Vec::new(),
            as_of: Utc::now().date_naive(),
            manifest_discovery: true,
            max_passes: DEFAULT_MAX_PASSES,
            cross_lock_name,
            ingest_lock_name,
            lock_wait: DEFAULT_LOCK_WAIT,
            cross_lock_ttl: DEFAULT_CROSS_LOCK_TTL,
            ingest_lock_ttl: DEFAULT_INGEST_LOCK_TTL,
            apply_concurrency: DEFAULT_APPLY_CONCURRENCY,
        }
    }

    /// Sets the ingestion symbol universe.
    #[must_use]
    pub fn with_universe(mut self, universe: Vec<Symbol>) -> Self {
        self.universe = universe;
        self
    }

    /// Sets the batch date.
    #[must_use]
    pub const fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = as_of;
        self
    }

    /// Enables or disables manifest-based discovery.
    #[must_use]
    pub const fn with_manifest_discovery(mut self, enabled: bool) -> Self {
        self.manifest_discovery = enabled;
        self
    }

    /// Sets the catch-up pass budget.
    #[must_use]
    pub const fn with_max_passes(mut self, max_passes: u32) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Sets the bounded lock wait.
    #[must_use]
    pub const fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Sets the apply concurrency.
    #[must_use]
    pub const fn with_apply_concurrency(mut self, concurrency: usize) -> Self {
        self.apply_concurrency = concurrency;
        self
    }

    /// Validates the configuration before any job step runs.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError::Configuration`] describing the first
    /// invalid setting found.
    pub fn validate(&self) -> Result<()> {
        if self.max_passes == 0 {
            return Err(PipelineError::configuration("max_passes must be at least 1"));
        }
        if self.apply_concurrency == 0 {
            return Err(PipelineError::configuration(
                "apply_concurrency must be at least 1",
            ));
        }
        if self.cross_lock_ttl.is_zero() || self.ingest_lock_ttl.is_zero() {
            return Err(PipelineError::configuration("lock TTLs must be non-zero"));
        }
        if self.cross_lock_name.is_empty() || self.ingest_lock_name.is_empty() {
            return Err(PipelineError::configuration("lock names must be non-empty"));
        }
        if self.cross_lock_name == self.ingest_lock_name {
            return Err(PipelineError::configuration(
                "cross-layer and ingest locks must be distinct resources",
            ));
        }
        Ok(())
    }
}
