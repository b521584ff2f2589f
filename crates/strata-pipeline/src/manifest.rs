//! Run manifests and acknowledgements: the cross-layer pointer log.
//!
//! A Bronze run that completes successfully publishes a [`RunManifest`]
//! enumerating exactly the symbols it durably committed. Silver follows
//! this log instead of re-listing the whole Bronze tier: the most recent
//! manifest without a matching [`Acknowledgement`] is the outstanding
//! work. An acknowledgement is the sole signal that a manifest is spent.
//!
//! Both documents are replay-safe:
//!
//! - Manifests are create-if-absent; a colliding run id is rejected with
//!   [`PipelineError::DuplicateRunId`] and the stored manifest stays
//!   canonical.
//! - Acknowledgements are idempotent upserts keyed by run id; writing the
//!   same logical content twice is a no-op, conflicting content is
//!   rejected.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::storage::{BlobStore, PutCondition, PutOutcome};
use strata_core::{Domain, Error as CoreError, RunId, Symbol, TierPaths};

use crate::error::{PipelineError, Result};

/// Durable record of the symbols committed by one Bronze run.
///
/// Immutable once written. Truthfulness invariant: every listed symbol has
/// a committed Bronze record with commit time at or before `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Id of the Bronze run that produced this manifest.
    pub run_id: RunId,

    /// When the manifest was written (after all records were durable).
    pub created_at: DateTime<Utc>,

    /// Dataset domain the run ingested.
    pub domain: Domain,

    /// Symbols committed by the run, sorted and deduplicated.
    pub symbols: Vec<Symbol>,

    /// Number of committed symbols.
    pub symbol_count: usize,
}

impl RunManifest {
    /// Builds a manifest for a completed run.
    ///
    /// Symbols are sorted and deduplicated; `created_at` is stamped now,
    /// which callers must only do after every listed record is durable.
    #[must_use]
    pub fn new(run_id: RunId, domain: Domain, symbols: impl IntoIterator<Item = Symbol>) -> Self {
        let mut symbols: Vec<Symbol> = symbols.into_iter().collect();
        symbols.sort();
        symbols.dedup();
        let symbol_count = symbols.len();
        Self {
            run_id,
            created_at: Utc::now(),
            domain,
            symbols,
            symbol_count,
        }
    }
}

/// Durable marker that a manifest was fully applied to Silver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// Run id of the consumed manifest.
    pub run_id: RunId,

    /// When the manifest was acknowledged.
    pub consumed_at: DateTime<Utc>,

    /// Id of the Silver run that applied the manifest.
    pub silver_run_id: RunId,

    /// Number of symbols actually applied.
    pub applied_symbol_count: usize,
}

impl Acknowledgement {
    /// Builds an acknowledgement for a fully applied manifest.
    #[must_use]
    pub fn new(run_id: RunId, silver_run_id: RunId, applied_symbol_count: usize) -> Self {
        Self {
            run_id,
            consumed_at: Utc::now(),
            silver_run_id,
            applied_symbol_count,
        }
    }

    /// Compares logical content, ignoring the `consumed_at` timestamp.
    ///
    /// Replayed acknowledgements from the same Silver run re-stamp the
    /// timestamp; the identity of the spend is the rest.
    #[must_use]
    pub fn matches_logical(&self, other: &Self) -> bool {
        self.run_id == other.run_id
            && self.silver_run_id == other.silver_run_id
            && self.applied_symbol_count == other.applied_symbol_count
    }
}

/// Outcome of recording an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The acknowledgement was written.
    Recorded,
    /// An identical acknowledgement already existed; nothing was written.
    AlreadyRecorded,
}

/// Store for the per-domain manifest and acknowledgement logs.
#[derive(Clone)]
pub struct ManifestStore {
    store: Arc<dyn BlobStore>,
}

impl ManifestStore {
    /// Creates a manifest store over the given backend.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Appends a manifest to the log.
    ///
    /// # Errors
    ///
    /// Fails with [`PipelineError::DuplicateRunId`] if a manifest already
    /// exists for the run id; the stored manifest is canonical.
    pub async fn put_manifest(&self, manifest: &RunManifest) -> Result<()> {
        let path = TierPaths::manifest(&manifest.domain, manifest.run_id);
        let body = encode(manifest)?;

        match self.store.put(&path, body, PutCondition::IfAbsent).await? {
            PutOutcome::Stored { .. } => Ok(()),
            PutOutcome::Conflict { .. } => Err(PipelineError::DuplicateRunId {
                run_id: manifest.run_id,
            }),
        }
    }

    /// Reads a manifest by run id.
    ///
    /// # Errors
    ///
    /// Returns storage or serialization errors; a missing manifest is `None`.
    pub async fn get_manifest(&self, domain: &Domain, run_id: RunId) -> Result<Option<RunManifest>> {
        read_optional(&*self.store, &TierPaths::manifest(domain, run_id)).await
    }

    /// Returns the most recent manifest for `domain` lacking an
    /// acknowledgement, or `None`.
    ///
    /// "Most recent" is run-id order: ULIDs sort by creation time, so the
    /// log needs two prefix listings and one point read, never a tier
    /// listing or a read of every manifest body.
    ///
    /// # Errors
    ///
    /// Returns storage or serialization errors from the underlying reads.
    pub async fn latest_unacknowledged(&self, domain: &Domain) -> Result<Option<RunManifest>> {
        let manifest_prefix = TierPaths::manifest_prefix(domain);
        let ack_prefix = TierPaths::ack_prefix(domain);

        let acked: HashSet<RunId> = self
            .store
            .list(&ack_prefix)
            .await?
            .iter()
            .filter_map(|meta| run_id_of(&meta.path, &ack_prefix))
            .collect();

        let mut pending: Vec<RunId> = self
            .store
            .list(&manifest_prefix)
            .await?
            .iter()
            // The acks/ subtree lives under the manifest prefix; manifest
            // entries are exactly the single-segment children.
            .filter_map(|meta| run_id_of(&meta.path, &manifest_prefix))
            .filter(|run_id| !acked.contains(run_id))
            .collect();

        pending.sort_unstable();

        let Some(latest) = pending.pop() else {
            return Ok(None);
        };

        match self.get_manifest(domain, latest).await? {
            Some(manifest) => Ok(Some(manifest)),
            // Deleted between listing and read (external purge); nothing to
            // hand off from this pointer anymore.
            None => Ok(None),
        }
    }

    /// Records an acknowledgement, spending the manifest.
    ///
    /// Idempotent upsert keyed by run id: an existing identical
    /// acknowledgement is a no-op.
    ///
    /// # Errors
    ///
    /// Fails with [`PipelineError::AcknowledgementConflict`] if an
    /// acknowledgement with different logical content already exists.
    pub async fn put_acknowledgement(
        &self,
        domain: &Domain,
        ack: &Acknowledgement,
    ) -> Result<AckOutcome> {
        let path = TierPaths::ack(domain, ack.run_id);
        let body = encode(ack)?;

        match self.store.put(&path, body, PutCondition::IfAbsent).await? {
            PutOutcome::Stored { .. } => Ok(AckOutcome::Recorded),
            PutOutcome::Conflict { .. } => {
                let existing: Acknowledgement = read_optional(&*self.store, &path)
                    .await?
                    .ok_or_else(|| CoreError::Internal {
                        message: format!("acknowledgement vanished during upsert: {path}"),
                    })?;

                if existing.matches_logical(ack) {
                    Ok(AckOutcome::AlreadyRecorded)
                } else {
                    Err(PipelineError::AcknowledgementConflict { run_id: ack.run_id })
                }
            }
        }
    }

    /// Reads an acknowledgement by manifest run id.
    ///
    /// # Errors
    ///
    /// Returns storage or serialization errors; a missing ack is `None`.
    pub async fn get_acknowledgement(
        &self,
        domain: &Domain,
        run_id: RunId,
    ) -> Result<Option<Acknowledgement>> {
        read_optional(&*self.store, &TierPaths::ack(domain, run_id)).await
    }
}

/// Parses `{run_id}.json` directly under `prefix`; rejects nested paths.
fn run_id_of(path: &str, prefix: &str) -> Option<RunId> {
    let rest = path.strip_prefix(prefix)?;
    if rest.contains('/') {
        return None;
    }
    rest.strip_suffix(".json")?.parse().ok()
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| CoreError::serialization(format!("encode manifest document: {e}")).into())
}

async fn read_optional<T: serde::de::DeserializeOwned>(
    store: &dyn BlobStore,
    path: &str,
) -> Result<Option<T>> {
    match store.get(path).await {
        Ok(data) => {
            let value = serde_json::from_slice(&data).map_err(|e| {
                CoreError::serialization(format!("parse manifest document {path}: {e}"))
            })?;
            Ok(Some(value))
        }
        Err(CoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
