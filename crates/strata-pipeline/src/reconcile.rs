//! Reconciliation auditor: Bronze/Silver symbol-set drift.
//!
//! Stateless and lock-free. Listing both tiers is confined to this
//! auditor (the jobs' normal read paths stay manifest-driven), and the
//! resulting report is purely observational: it never mutates tier state
//! and does not participate in correctness enforcement.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::storage::{BlobStore, PutCondition};
use strata_core::{Domain, Error as CoreError, Symbol, Tier, TierPaths};

use crate::error::Result;
use crate::tier::TierStore;

/// Snapshot of symbol-coverage drift between the tiers.
///
/// Regenerated wholesale on each run; the stored document at
/// `system/reconciliation/{domain}/latest.json` is always the newest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,

    /// Audited domain.
    pub domain: Domain,

    /// Number of symbols present only in Bronze (lag).
    pub bronze_only_symbol_count: usize,

    /// Number of symbols present only in Silver (orphans).
    pub silver_only_symbol_count: usize,

    /// Symbols not yet handed off to Silver, sorted.
    pub bronze_only_symbols: Vec<Symbol>,

    /// Symbols stale or removed upstream, sorted.
    pub silver_only_symbols: Vec<Symbol>,
}

impl ReconciliationReport {
    /// Returns true when the tiers cover the same symbols.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.bronze_only_symbols.is_empty() && self.silver_only_symbols.is_empty()
    }
}

/// Read-only auditor computing Bronze/Silver drift for a domain.
pub struct ReconciliationReporter {
    store: Arc<dyn BlobStore>,
}

impl ReconciliationReporter {
    /// Creates a reporter over the given backend.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Computes the drift report and overwrites the stored copy.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the tier listings or the report write.
    pub async fn run(&self, domain: &Domain) -> Result<ReconciliationReport> {
        let tier = TierStore::new(Arc::clone(&self.store));

        let bronze = tier.symbols(Tier::Bronze, domain).await?;
        let silver = tier.symbols(Tier::Silver, domain).await?;

        let bronze_only: Vec<Symbol> = bronze.difference(&silver).cloned().collect();
        let silver_only: Vec<Symbol> = silver.difference(&bronze).cloned().collect();

        let report = ReconciliationReport {
            generated_at: Utc::now(),
            domain: domain.clone(),
            bronze_only_symbol_count: bronze_only.len(),
            silver_only_symbol_count: silver_only.len(),
            bronze_only_symbols: bronze_only,
            silver_only_symbols: silver_only,
        };

        let body = serde_json::to_vec(&report)
            .map(Bytes::from)
            .map_err(|e| CoreError::serialization(format!("encode reconciliation report: {e}")))?;
        self.store
            .put(&TierPaths::reconciliation(domain), body, PutCondition::Always)
            .await?;

        tracing::info!(
            lag = report.bronze_only_symbol_count,
            orphans = report.silver_only_symbol_count,
            "reconciliation report written"
        );
        Ok(report)
    }
}
