//! # strata-core
//!
//! Core abstractions for the Strata medallion data platform.
//!
//! This crate provides the foundational types used across all Strata
//! components:
//!
//! - **Storage**: Durable blob-store abstraction with conditional writes
//! - **Locks**: Expiring advisory lock over a named durable resource
//! - **Paths**: Canonical object layout for tier records and system state
//! - **Identifiers**: Strongly-typed run identifiers
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `strata-core` is the only crate allowed to define shared primitives.
//! The pipeline jobs interact with the durable store exclusively through
//! the [`BlobStore`] trait, so tests can substitute in-memory backends.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod lock;
pub mod observability;
pub mod paths;
pub mod storage;

pub use error::{Error, Result};
pub use id::RunId;
pub use lock::{LeaseInfo, LockCoordinator, LockLeaseGuard};
pub use observability::{LogFormat, init_logging};
pub use paths::{Domain, Symbol, Tier, TierPaths};
pub use storage::{BlobMeta, BlobStore, MemoryBlobStore, ObjectStoreBackend, PutCondition, PutOutcome};
