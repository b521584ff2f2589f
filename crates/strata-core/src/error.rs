//! Error types and result aliases shared across Strata components.

use std::time::Duration;

/// The result type used throughout strata-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core storage and coordination operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A lock could not be acquired within the bounded wait.
    ///
    /// Transient: the caller may retry on its next scheduled run, or treat
    /// the contention as "another instance is progressing".
    #[error("lock '{lock_name}' not acquired within {waited:?}")]
    LockTimeout {
        /// Name of the contended lock.
        lock_name: String,
        /// How long the acquirer waited before giving up.
        waited: Duration,
    },

    /// A held lease expired before its critical section completed.
    ///
    /// The holder must abort any outstanding mutations for that section.
    #[error("lease on lock '{lock_name}' expired mid critical section")]
    LockStolen {
        /// Name of the lock whose lease was lost.
        lock_name: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true if this error is a bounded lock-wait timeout.
    #[must_use]
    pub const fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}
