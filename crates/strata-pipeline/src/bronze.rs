//! Bronze ingestion job: fetch, commit, publish.
//!
//! The job stages every targeted symbol in memory first; only a run in
//! which each symbol resolved to rows or an explicit skip gets a durable
//! commit. Records and the manifest are written inside the cross-layer
//! critical section, and the manifest is written last, so a manifest can
//! never name a symbol whose record is not already durable.
//!
//! Two locks are involved:
//!
//! - The per-domain **ingest lock** serializes concurrent Bronze runs for
//!   the same domain so they don't duplicate fetch work. Contention is a
//!   clean no-op exit, not an error. Its lease TTL is the shorter of the
//!   two.
//! - The shared **cross-layer lock** brackets only the durable-write
//!   section, keeping Silver's read-and-decide window from overlapping a
//!   Bronze commit.

use std::sync::Arc;

use chrono::Utc;
use tracing::Instrument;

use strata_core::observability::job_span;
use strata_core::storage::BlobStore;
use strata_core::{LockCoordinator, RunId, Symbol};

use crate::config::JobConfig;
use crate::error::Result;
use crate::manifest::{ManifestStore, RunManifest};
use crate::source::{FetchOutcome, MarketDataSource};
use crate::tier::{BronzeRecord, SeriesRow, TierStore};

/// A symbol the run intentionally did not commit.
#[derive(Debug, Clone)]
pub struct SkippedSymbol {
    /// The skipped symbol.
    pub symbol: Symbol,
    /// Recorded reason.
    pub reason: String,
}

/// Summary of a committed ingestion run.
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// Id of the run; also the key of its manifest.
    pub run_id: RunId,
    /// Symbols durably committed, in manifest order.
    pub committed: Vec<Symbol>,
    /// Symbols explicitly skipped, with reasons.
    pub skipped: Vec<SkippedSymbol>,
}

/// Terminal outcome of an ingestion run.
#[derive(Debug)]
pub enum IngestOutcome {
    /// The run committed its records and published a manifest.
    Committed(IngestReport),
    /// Another Bronze run holds the domain; nothing was fetched or written.
    Deferred,
}

/// The Bronze ingestion job.
pub struct BronzeIngestionJob {
    store: Arc<dyn BlobStore>,
    source: Arc<dyn MarketDataSource>,
    config: JobConfig,
}

impl BronzeIngestionJob {
    /// Creates an ingestion job.
    #[must_use]
    pub fn new(
        store: Arc<dyn BlobStore>,
        source: Arc<dyn MarketDataSource>,
        config: JobConfig,
    ) -> Self {
        Self {
            store,
            source,
            config,
        }
    }

    /// Runs one ingestion batch.
    ///
    /// # Errors
    ///
    /// Fails on configuration errors, unrecoverable fetch failures, or
    /// storage errors inside the commit section. A failed run publishes no
    /// manifest; re-running it is safe because record writes are
    /// idempotent per (symbol, as-of).
    pub async fn run(&self) -> Result<IngestOutcome> {
        self.config.validate()?;
        let span = job_span("ingest", self.config.domain.as_str());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> Result<IngestOutcome> {
        let domain = &self.config.domain;

        let ingest_lock = LockCoordinator::new(
            Arc::clone(&self.store),
            self.config.ingest_lock_name.clone(),
            self.config.ingest_lock_ttl,
        );
        let ingest_lease = match ingest_lock.acquire(self.config.lock_wait).await {
            Ok(lease) => lease,
            Err(e) if e.is_lock_timeout() => {
                tracing::info!("another ingestion run holds the domain; deferring");
                return Ok(IngestOutcome::Deferred);
            }
            Err(e) => return Err(e.into()),
        };

        // Stage everything before touching the store: a partial fetch must
        // not leave a run that could be mistaken for complete.
        let mut staged: Vec<(Symbol, Vec<SeriesRow>)> = Vec::new();
        let mut skipped: Vec<SkippedSymbol> = Vec::new();

        for symbol in &self.config.universe {
            match self.source.fetch(domain, symbol).await? {
                FetchOutcome::Series(rows) => staged.push((symbol.clone(), rows)),
                FetchOutcome::Skip { reason } => {
                    tracing::warn!(symbol = %symbol, reason = %reason, "symbol skipped");
                    skipped.push(SkippedSymbol {
                        symbol: symbol.clone(),
                        reason,
                    });
                }
            }
        }

        let run_id = RunId::generate();
        let report = self.commit(run_id, staged, skipped).await?;

        ingest_lease.release().await?;
        Ok(IngestOutcome::Committed(report))
    }

    /// The cross-layer critical section: records first, manifest last.
    async fn commit(
        &self,
        run_id: RunId,
        staged: Vec<(Symbol, Vec<SeriesRow>)>,
        skipped: Vec<SkippedSymbol>,
    ) -> Result<IngestReport> {
        let domain = &self.config.domain;
        let tier = TierStore::new(Arc::clone(&self.store));
        let manifests = ManifestStore::new(Arc::clone(&self.store));

        let cross_lock = LockCoordinator::new(
            Arc::clone(&self.store),
            self.config.cross_lock_name.clone(),
            self.config.cross_lock_ttl,
        );
        let lease = cross_lock.acquire(self.config.lock_wait).await?;

        let mut committed: Vec<Symbol> = Vec::with_capacity(staged.len());
        for (symbol, rows) in staged {
            lease.ensure_held()?;
            let record = BronzeRecord {
                domain: domain.clone(),
                symbol: symbol.clone(),
                as_of: self.config.as_of,
                source: self.source.name().to_string(),
                ingested_at: Utc::now(),
                rows,
            };
            tier.write_bronze(&record).await?;
            committed.push(symbol);
        }

        lease.ensure_held()?;
        let manifest = RunManifest::new(run_id, domain.clone(), committed.iter().cloned());
        manifests.put_manifest(&manifest).await?;

        lease.release().await?;

        tracing::info!(
            run_id = %run_id,
            committed = manifest.symbol_count,
            skipped = skipped.len(),
            "ingestion run committed"
        );

        Ok(IngestReport {
            run_id,
            committed: manifest.symbols,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use strata_core::{Domain, MemoryBlobStore, Tier};

    fn domain() -> Domain {
        Domain::new("equities-daily").expect("domain")
    }

    fn symbol(t: &str) -> Symbol {
        Symbol::new(t).expect("symbol")
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

    fn config(universe: &[&str]) -> JobConfig {
        JobConfig::new(domain())
            .with_universe(universe.iter().map(|t| symbol(t)).collect())
            .with_lock_wait(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn successful_run_commits_records_and_manifest() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let source = Arc::new(
            StaticSourceFixture::default()
                .series("AAPL")
                .series("MSFT")
                .skip("HALT", "trading halted"),
        );
        let job = BronzeIngestionJob::new(
            Arc::clone(&store),
            source,
            config(&["AAPL", "MSFT", "HALT"]),
        );

        let IngestOutcome::Committed(report) = job.run().await.expect("run") else {
            panic!("expected commit");
        };
        assert_eq!(report.committed, vec![symbol("AAPL"), symbol("MSFT")]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, "trading halted");

        let tier = TierStore::new(Arc::clone(&store));
        let bronze_symbols = tier.symbols(Tier::Bronze, &domain()).await.expect("list");
        assert_eq!(bronze_symbols.len(), 2);

        let manifests = ManifestStore::new(store);
        let pending = manifests
            .latest_unacknowledged(&domain())
            .await
            .expect("query")
            .expect("manifest");
        assert_eq!(pending.run_id, report.run_id);
        assert_eq!(pending.symbol_count, 2);
    }

    #[tokio::test]
    async fn failed_fetch_aborts_without_manifest() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let source = Arc::new(
            StaticSourceFixture::default()
                .series("AAPL")
                .fail("BOOM", "upstream 500"),
        );
        let job = BronzeIngestionJob::new(Arc::clone(&store), source, config(&["AAPL", "BOOM"]));

        assert!(job.run().await.is_err());

        let manifests = ManifestStore::new(Arc::clone(&store));
        assert!(
            manifests
                .latest_unacknowledged(&domain())
                .await
                .expect("query")
                .is_none(),
            "a failed run must not publish a manifest"
        );

        // Nothing was staged to the tier either: the fetch phase aborted
        // before the commit section opened.
        let tier = TierStore::new(store);
        assert!(tier
            .symbols(Tier::Bronze, &domain())
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn concurrent_run_defers_on_ingest_lock() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());

        // Simulate a live peer by holding the ingest lock directly.
        let cfg = config(&["AAPL"]);
        let peer = LockCoordinator::new(
            Arc::clone(&store),
            cfg.ingest_lock_name.clone(),
            Duration::from_secs(60),
        );
        let _held = peer.acquire(Duration::from_millis(100)).await.expect("peer");

        let source = Arc::new(StaticSourceFixture::default().series("AAPL"));
        let job = BronzeIngestionJob::new(Arc::clone(&store), source, cfg);

        let outcome = job.run().await.expect("run");
        assert!(matches!(outcome, IngestOutcome::Deferred));

        let manifests = ManifestStore::new(store);
        assert!(manifests
            .latest_unacknowledged(&domain())
            .await
            .expect("query")
            .is_none());
    }

    #[tokio::test]
    async fn manifest_symbols_all_have_committed_records() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let source = Arc::new(StaticSourceFixture::default().series("AAPL").series("MSFT"));
        let job = BronzeIngestionJob::new(Arc::clone(&store), source, config(&["AAPL", "MSFT"]));

        let IngestOutcome::Committed(report) = job.run().await.expect("run") else {
            panic!("expected commit");
        };

        let tier = TierStore::new(Arc::clone(&store));
        let manifests = ManifestStore::new(store);
        let manifest = manifests
            .get_manifest(&domain(), report.run_id)
            .await
            .expect("get")
            .expect("exists");

        for sym in &manifest.symbols {
            let record = tier
                .latest_bronze(&domain(), sym)
                .await
                .expect("read")
                .expect("record exists for every manifest symbol");
            assert!(
                record.ingested_at <= manifest.created_at,
                "record commit time must not exceed manifest created_at"
            );
        }
    }

    /// Minimal fixture mirroring `StaticSource` with &str ergonomics.
    #[derive(Default)]
    struct StaticSourceFixture {
        inner: std::collections::HashMap<String, FetchPlan>,
    }

    enum FetchPlan {
        Series,
        Skip(String),
        Fail(String),
    }

    impl StaticSourceFixture {
        fn series(mut self, t: &str) -> Self {
            self.inner.insert(t.into(), FetchPlan::Series);
            self
        }

        fn skip(mut self, t: &str, reason: &str) -> Self {
            self.inner.insert(t.into(), FetchPlan::Skip(reason.into()));
            self
        }

        fn fail(mut self, t: &str, message: &str) -> Self {
            self.inner.insert(t.into(), FetchPlan::Fail(message.into()));
            self
        }
    }

    #[async_trait::async_trait]
    impl MarketDataSource for StaticSourceFixture {
        fn name(&self) -> &str {
            "fixture"
        }

        async fn fetch(&self, _domain: &Domain, symbol: &Symbol) -> Result<FetchOutcome> {
            match self.inner.get(symbol.as_str()) {
                Some(FetchPlan::Series) => Ok(FetchOutcome::Series(vec![row()])),
                Some(FetchPlan::Skip(reason)) => Ok(FetchOutcome::Skip {
                    reason: reason.clone(),
                }),
                Some(FetchPlan::Fail(message)) => Err(crate::error::PipelineError::source_failure(
                    symbol.as_str(),
                    message.clone(),
                )),
                None => Ok(FetchOutcome::Skip {
                    reason: "unplanned symbol".into(),
                }),
            }
        }
    }
}
