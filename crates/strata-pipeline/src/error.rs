//! Error types for the pipeline jobs.

use strata_core::RunId;

/// The result type used throughout strata-pipeline.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur in pipeline operations.
///
/// Everything except [`DuplicateRunId`](PipelineError::DuplicateRunId),
/// [`AcknowledgementConflict`](PipelineError::AcknowledgementConflict), and
/// configuration errors is safe to retry on the next scheduled run: every
/// mutation is idempotent per symbol and per manifest.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A manifest already exists for this run id.
    ///
    /// Manifests are append-only; the caller must treat the stored manifest
    /// as canonical.
    #[error("manifest already exists for run {run_id}")]
    DuplicateRunId {
        /// The run id that collided.
        run_id: RunId,
    },

    /// An acknowledgement exists for this run id with different content.
    ///
    /// At most one logical acknowledgement may spend a manifest; identical
    /// replays are no-ops, conflicting content is a protocol violation.
    #[error("conflicting acknowledgement for run {run_id}")]
    AcknowledgementConflict {
        /// The manifest run id that was doubly acknowledged.
        run_id: RunId,
    },

    /// A symbol could not be fetched from the upstream data source.
    ///
    /// Distinct from an explicit skip: a failed fetch aborts the ingestion
    /// run so no untruthful manifest is emitted.
    #[error("source failure for symbol {symbol}: {message}")]
    SourceFailure {
        /// The symbol whose fetch failed.
        symbol: String,
        /// Description of the failure.
        message: String,
    },

    /// Invalid job configuration, detected before any job step runs.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An error from strata-core (storage, locks, serialization).
    #[error(transparent)]
    Core(#[from] strata_core::Error),
}

impl PipelineError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new source failure error.
    #[must_use]
    pub fn source_failure(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceFailure {
            symbol: symbol.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error is a bounded lock-wait timeout.
    #[must_use]
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_lock_timeout())
    }
}
