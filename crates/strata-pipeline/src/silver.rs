//! Silver materialization job: the bounded catch-up convergence loop.
//!
//! Each pass walks an explicit state machine (Discover, Lock, Apply, Ack)
//! and the loop repeats until the work-set is empty or a configured
//! pass budget is exhausted. The budget is what keeps the loop finite
//! against a continuously appending Bronze tier: running out of passes is
//! a reported condition (`PartialConvergence`), never a corruption, since
//! every unit of work is idempotent and atomic at symbol granularity.
//!
//! Discovery prefers the manifest pointer log (`latest_unacknowledged`)
//! and falls back to a brute-force Bronze−Silver diff when the log is
//! disabled or empty. Lock contention is "another instance is
//! progressing": a pass that cannot take the lock is skipped, and a run
//! that ends that way exits `Deferred`, not failed.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::StreamExt;
use tracing::Instrument;

use strata_core::lock::LockLeaseGuard;
use strata_core::observability::job_span;
use strata_core::storage::BlobStore;
use strata_core::{LockCoordinator, RunId, Symbol, Tier};

use crate::config::JobConfig;
use crate::error::{PipelineError, Result};
use crate::manifest::{Acknowledgement, ManifestStore, RunManifest};
use crate::tier::{TierStore, derive_silver};

/// Terminal outcome of a materialization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterializationOutcome {
    /// Silver coverage matches Bronze; nothing outstanding.
    Converged {
        /// Passes consumed, including the one that observed emptiness.
        passes: u32,
        /// Symbols applied across all passes of this run.
        applied: usize,
    },
    /// The pass budget ran out with work remaining. Resolved by the next
    /// scheduled invocation; never retried in-process.
    PartialConvergence {
        /// Passes consumed (the full budget).
        passes: u32,
        /// Outstanding symbols at exit.
        remaining: usize,
    },
    /// Every remaining pass lost the lock to a concurrent instance; this
    /// run stepped aside without applying further work.
    Deferred {
        /// Passes consumed (the full budget).
        passes: u32,
    },
}

/// What one pass discovered to work on.
struct Discovery {
    work: BTreeSet<Symbol>,
    manifest: Option<RunManifest>,
}

/// Result of applying one pass's work-set.
struct ApplySummary {
    applied: usize,
    skipped: usize,
}

/// Per-symbol apply result inside a pass.
enum Applied {
    Done,
    Skipped { symbol: Symbol, reason: String },
}

/// The Silver materialization job.
pub struct SilverMaterializationJob {
    store: Arc<dyn BlobStore>,
    config: JobConfig,
}

impl SilverMaterializationJob {
    /// Creates a materialization job.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, config: JobConfig) -> Self {
        Self { store, config }
    }

    /// Runs the bounded catch-up loop.
    ///
    /// # Errors
    ///
    /// Fails on configuration errors, storage errors inside the apply
    /// section, or a stolen lease. All failures are safe to retry on the
    /// next scheduled run.
    pub async fn run(&self) -> Result<MaterializationOutcome> {
        self.config.validate()?;
        let span = job_span("materialize", self.config.domain.as_str());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> Result<MaterializationOutcome> {
        let silver_run_id = RunId::generate();
        let tier = TierStore::new(Arc::clone(&self.store));
        let manifests = ManifestStore::new(Arc::clone(&self.store));
        let lock = LockCoordinator::new(
            Arc::clone(&self.store),
            self.config.cross_lock_name.clone(),
            self.config.cross_lock_ttl,
        );

        let max_passes = self.config.max_passes;
        let mut applied_total = 0usize;
        let mut last_pass_deferred = false;

        for pass in 1..=max_passes {
            let discovery = self.discover(&manifests, &tier).await?;

            if discovery.work.is_empty() {
                if let Some(manifest) = discovery.manifest {
                    // A manifest with nothing to apply (e.g. a run whose
                    // symbols were all skipped) is spent vacuously so the
                    // pointer log keeps moving.
                    self.acknowledge(&manifests, &manifest, silver_run_id, 0)
                        .await?;
                    continue;
                }
                tracing::info!(passes = pass, applied = applied_total, "converged");
                return Ok(MaterializationOutcome::Converged {
                    passes: pass,
                    applied: applied_total,
                });
            }

            let lease = match lock.acquire(self.config.lock_wait).await {
                Ok(lease) => lease,
                Err(e) if e.is_lock_timeout() => {
                    tracing::info!(pass, "lock contended; skipping pass");
                    last_pass_deferred = true;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            last_pass_deferred = false;

            let summary = match self.apply(&lease, &tier, &discovery.work).await {
                Ok(summary) => {
                    lease.release().await?;
                    summary
                }
                Err(e) => {
                    // Abort the critical section; idempotent upserts make
                    // whatever landed harmless for the next attempt.
                    let _ = lease.release().await;
                    return Err(e);
                }
            };

            applied_total += summary.applied;
            tracing::info!(
                pass,
                applied = summary.applied,
                skipped = summary.skipped,
                "pass applied"
            );

            if let Some(manifest) = discovery.manifest {
                self.acknowledge(&manifests, &manifest, silver_run_id, summary.applied)
                    .await?;
            }
        }

        // Budget exhausted: one read-only check decides what to report.
        let remaining = self.discover(&manifests, &tier).await?.work;
        if remaining.is_empty() {
            tracing::info!(passes = max_passes, applied = applied_total, "converged");
            return Ok(MaterializationOutcome::Converged {
                passes: max_passes,
                applied: applied_total,
            });
        }
        if last_pass_deferred {
            tracing::info!(passes = max_passes, "deferred to concurrent instance");
            return Ok(MaterializationOutcome::Deferred { passes: max_passes });
        }

        tracing::warn!(
            passes = max_passes,
            remaining = remaining.len(),
            "pass budget exhausted with work remaining"
        );
        Ok(MaterializationOutcome::PartialConvergence {
            passes: max_passes,
            remaining: remaining.len(),
        })
    }

    /// Discovers the work-set: manifest pointer log first, tier diff as
    /// the fallback.
    async fn discover(&self, manifests: &ManifestStore, tier: &TierStore) -> Result<Discovery> {
        let domain = &self.config.domain;

        if self.config.manifest_discovery {
            if let Some(manifest) = manifests.latest_unacknowledged(domain).await? {
                tracing::debug!(run_id = %manifest.run_id, symbols = manifest.symbol_count, "discovered via manifest");
                return Ok(Discovery {
                    work: manifest.symbols.iter().cloned().collect(),
                    manifest: Some(manifest),
                });
            }
        }

        let bronze = tier.symbols(Tier::Bronze, domain).await?;
        let silver = tier.symbols(Tier::Silver, domain).await?;
        let work: BTreeSet<Symbol> = bronze.difference(&silver).cloned().collect();
        tracing::debug!(lag = work.len(), "discovered via tier diff");
        Ok(Discovery {
            work,
            manifest: None,
        })
    }

    /// Applies one work-set under the held lease.
    ///
    /// Symbols are independent and idempotent, so they materialize with
    /// bounded concurrency and in no particular order. A missing or
    /// corrupt Bronze read skips that symbol with a warning; the pass
    /// carries on.
    async fn apply(
        &self,
        lease: &LockLeaseGuard,
        tier: &TierStore,
        work: &BTreeSet<Symbol>,
    ) -> Result<ApplySummary> {
        let domain = &self.config.domain;

        let mut results = futures::stream::iter(work.iter().cloned().map(|symbol| {
            let tier = tier.clone();
            async move {
                lease.ensure_held()?;
                match tier.latest_bronze(domain, &symbol).await {
                    Ok(Some(bronze)) => {
                        let silver = derive_silver(&bronze);
                        lease.ensure_held()?;
                        tier.write_silver(&silver).await?;
                        Ok::<Applied, PipelineError>(Applied::Done)
                    }
                    Ok(None) => Ok(Applied::Skipped {
                        symbol,
                        reason: "no committed bronze record".into(),
                    }),
                    // Upstream read trouble is a per-symbol condition, not
                    // a reason to abort the pass.
                    Err(e) => Ok(Applied::Skipped {
                        symbol,
                        reason: e.to_string(),
                    }),
                }
            }
        }))
        .buffer_unordered(self.config.apply_concurrency);

        let mut summary = ApplySummary {
            applied: 0,
            skipped: 0,
        };
        while let Some(result) = results.next().await {
            match result? {
                Applied::Done => summary.applied += 1,
                Applied::Skipped { symbol, reason } => {
                    tracing::warn!(symbol = %symbol, reason = %reason, "symbol skipped during apply");
                    summary.skipped += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Spends the consumed manifest.
    ///
    /// A concurrent instance may have acknowledged it first with its own
    /// run id; that is the protocol working, not a failure.
    async fn acknowledge(
        &self,
        manifests: &ManifestStore,
        manifest: &RunManifest,
        silver_run_id: RunId,
        applied: usize,
    ) -> Result<()> {
        let ack = Acknowledgement::new(manifest.run_id, silver_run_id, applied);
        match manifests
            .put_acknowledgement(&self.config.domain, &ack)
            .await
        {
            Ok(_) => Ok(()),
            Err(PipelineError::AcknowledgementConflict { run_id }) => {
                tracing::warn!(run_id = %run_id, "manifest acknowledged by a concurrent instance");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{NaiveDate, Utc};

    use strata_core::{Domain, MemoryBlobStore};

    use crate::tier::{BronzeRecord, SeriesRow};

    fn domain() -> Domain {
        Domain::new("equities-daily").expect("domain")
    }

    fn symbol(t: &str) -> Symbol {
        Symbol::new(t).expect("symbol")
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 5).expect("date")
    }

    fn row() -> SeriesRow {
        SeriesRow {
            ts: "2026-01-05T21:00:00Z".into(),
            open: Some(100.0),
            high: Some(101.0),
            low: Some(99.0),
            close: Some(100.5),
            volume: Some(5000.0),
        }
    }

    fn config() -> JobConfig {
        JobConfig::new(domain())
            .with_as_of(as_of())
            .with_lock_wait(Duration::from_millis(200))
    }

    async fn seed_bronze(store: &Arc<dyn BlobStore>, tickers: &[&str]) -> Vec<Symbol> {
        let tier = TierStore::new(Arc::clone(store));
        let mut symbols = Vec::new();
        for t in tickers {
            let sym = symbol(t);
            tier.write_bronze(&BronzeRecord {
                domain: domain(),
                symbol: sym.clone(),
                as_of: as_of(),
                source: "fixture".into(),
                ingested_at: Utc::now(),
                rows: vec![row()],
            })
            .await
            .expect("seed bronze");
            symbols.push(sym);
        }
        symbols
    }

    #[tokio::test]
    async fn manifest_path_applies_and_acknowledges() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let symbols = seed_bronze(&store, &["AAPL", "MSFT"]).await;

        let manifests = ManifestStore::new(Arc::clone(&store));
        let manifest = RunManifest::new(RunId::generate(), domain(), symbols.clone());
        manifests.put_manifest(&manifest).await.expect("manifest");

        let job = SilverMaterializationJob::new(Arc::clone(&store), config());
        let outcome = job.run().await.expect("run");
        assert!(matches!(
            outcome,
            MaterializationOutcome::Converged { applied: 2, .. }
        ));

        let tier = TierStore::new(Arc::clone(&store));
        for sym in &symbols {
            assert!(tier
                .get_silver(&domain(), sym, as_of())
                .await
                .expect("read")
                .is_some());
        }

        let ack = manifests
            .get_acknowledgement(&domain(), manifest.run_id)
            .await
            .expect("read")
            .expect("acknowledged");
        assert_eq!(ack.applied_symbol_count, 2);
    }

    #[tokio::test]
    async fn diff_path_converges_without_manifests() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        seed_bronze(&store, &["AAPL", "MSFT", "GOOG"]).await;

        let job = SilverMaterializationJob::new(
            Arc::clone(&store),
            config().with_manifest_discovery(false),
        );
        let outcome = job.run().await.expect("run");
        assert!(matches!(
            outcome,
            MaterializationOutcome::Converged { applied: 3, .. }
        ));
    }

    #[tokio::test]
    async fn static_bronze_converges_within_two_passes() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        seed_bronze(&store, &["AAPL"]).await;

        let job = SilverMaterializationJob::new(
            Arc::clone(&store),
            config().with_manifest_discovery(false).with_max_passes(2),
        );
        let outcome = job.run().await.expect("run");
        let MaterializationOutcome::Converged { passes, applied } = outcome else {
            panic!("expected convergence, got {outcome:?}");
        };
        assert_eq!(applied, 1);
        assert!(passes <= 2, "static bronze must converge within two passes");
    }

    #[tokio::test]
    async fn contended_lock_defers_instead_of_failing() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        seed_bronze(&store, &["AAPL"]).await;

        let cfg = config().with_manifest_discovery(false).with_max_passes(1);
        let peer = LockCoordinator::new(
            Arc::clone(&store),
            cfg.cross_lock_name.clone(),
            Duration::from_secs(60),
        );
        let _held = peer.acquire(Duration::from_millis(100)).await.expect("peer");

        let job = SilverMaterializationJob::new(Arc::clone(&store), cfg);
        let outcome = job.run().await.expect("run");
        assert_eq!(outcome, MaterializationOutcome::Deferred { passes: 1 });

        // Nothing was applied while locked out.
        let tier = TierStore::new(store);
        assert!(tier
            .symbols(Tier::Silver, &domain())
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn manifest_naming_purged_symbol_is_skipped_and_spent() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());

        // Manifest references a symbol with no surviving Bronze record
        // (external purge after publication).
        let manifests = ManifestStore::new(Arc::clone(&store));
        let manifest = RunManifest::new(RunId::generate(), domain(), vec![symbol("GONE")]);
        manifests.put_manifest(&manifest).await.expect("manifest");

        let job = SilverMaterializationJob::new(Arc::clone(&store), config());
        let outcome = job.run().await.expect("run");
        assert!(matches!(outcome, MaterializationOutcome::Converged { .. }));

        let ack = manifests
            .get_acknowledgement(&domain(), manifest.run_id)
            .await
            .expect("read")
            .expect("spent despite the skip");
        assert_eq!(ack.applied_symbol_count, 0);
    }

    #[tokio::test]
    async fn empty_manifest_is_spent_vacuously() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());

        let manifests = ManifestStore::new(Arc::clone(&store));
        let manifest = RunManifest::new(RunId::generate(), domain(), Vec::<Symbol>::new());
        manifests.put_manifest(&manifest).await.expect("manifest");

        let job = SilverMaterializationJob::new(Arc::clone(&store), config());
        let outcome = job.run().await.expect("run");
        assert!(matches!(outcome, MaterializationOutcome::Converged { .. }));

        assert!(manifests
            .get_acknowledgement(&domain(), manifest.run_id)
            .await
            .expect("read")
            .is_some());
    }

    #[tokio::test]
    async fn already_converged_run_reports_success() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        seed_bronze(&store, &["AAPL"]).await;

        let cfg = config().with_manifest_discovery(false);
        let job = SilverMaterializationJob::new(Arc::clone(&store), cfg.clone());
        job.run().await.expect("first run");

        let again = SilverMaterializationJob::new(store, cfg);
        let outcome = again.run().await.expect("second run");
        assert!(matches!(
            outcome,
            MaterializationOutcome::Converged { applied: 0, .. }
        ));
    }
}
