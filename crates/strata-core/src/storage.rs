//! Durable blob-store abstraction with conditional-write semantics.
//!
//! Every durable document in Strata (tier records, run manifests,
//! acknowledgements, lock leases, reconciliation reports) lives behind the
//! [`BlobStore`] trait. The contract is shaped by cloud object storage:
//! conditional writes with preconditions, opaque version tokens, and
//! prefix listing.
//!
//! Version tokens are opaque strings so backends stay interchangeable:
//! GCS generations, S3 `ETag`s, and the in-memory counter all fit.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::path::Path as StorePath;
use object_store::{ObjectStore, PutMode, PutOptions, UpdateVersion};

use crate::error::{Error, Result};

/// Precondition attached to a write.
#[derive(Debug, Clone)]
pub enum PutCondition {
    /// Write only if no object exists at the path (compare-and-insert).
    IfAbsent,
    /// Write only if the object's current version matches the token.
    IfVersion(String),
    /// Write unconditionally.
    Always,
}

/// Result of a conditional write.
///
/// A failed precondition is a normal outcome, never an `Err`.
#[derive(Debug, Clone)]
pub enum PutOutcome {
    /// The write landed; carries the new version token.
    Stored {
        /// Version token of the object after the write.
        version: String,
    },
    /// The precondition did not hold.
    Conflict {
        /// Version token of the object that caused the conflict, or `"0"`
        /// if the object vanished before it could be observed.
        current_version: String,
    },
}

impl PutOutcome {
    /// Returns true if the write landed.
    #[must_use]
    pub const fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

/// Metadata about a stored blob.
#[derive(Debug, Clone)]
pub struct BlobMeta {
    /// Blob path (key).
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Opaque version token for conditional writes.
    pub version: String,
    /// Last modification timestamp, when the backend reports one.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Durable blob store with compare-and-swap writes.
///
/// Implementations must be safe to share across tasks; all Strata jobs hold
/// the store as `Arc<dyn BlobStore>`.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Reads an entire blob.
    ///
    /// Returns [`Error::NotFound`] if nothing exists at the path.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes a blob under the given precondition.
    ///
    /// A failed precondition is reported as [`PutOutcome::Conflict`], never
    /// as an error.
    async fn put(&self, path: &str, data: Bytes, condition: PutCondition) -> Result<PutOutcome>;

    /// Returns blob metadata without reading content, or `None` if absent.
    async fn head(&self, path: &str) -> Result<Option<BlobMeta>>;

    /// Lists blobs under a prefix. Order is backend-defined; callers needing
    /// determinism must sort.
    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>>;

    /// Deletes a blob. Succeeds even if the blob does not exist.
    async fn delete(&self, path: &str) -> Result<()>;
}

// ============================================================================
// In-memory backend
// ============================================================================

/// In-memory blob store for tests.
///
/// Thread-safe via `RwLock`; versions are a per-path counter exposed as
/// strings, mimicking GCS generation semantics.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<BTreeMap<String, StoredBlob>>>,
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    version: u64,
    last_modified: DateTime<Utc>,
}

impl MemoryBlobStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn meta_for(path: &str, blob: &StoredBlob) -> BlobMeta {
        BlobMeta {
            path: path.to_string(),
            size: blob.data.len() as u64,
            version: blob.version.to_string(),
            last_modified: Some(blob.last_modified),
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let blobs = self.blobs.read().map_err(|_| Error::Internal {
            message: "blob map poisoned".into(),
        })?;

        blobs
            .get(path)
            .map(|b| b.data.clone())
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    async fn put(&self, path: &str, data: Bytes, condition: PutCondition) -> Result<PutOutcome> {
        let mut blobs = self.blobs.write().map_err(|_| Error::Internal {
            message: "blob map poisoned".into(),
        })?;

        let current = blobs.get(path);
        match condition {
            PutCondition::IfAbsent => {
                if let Some(blob) = current {
                    return Ok(PutOutcome::Conflict {
                        current_version: blob.version.to_string(),
                    });
                }
            }
            PutCondition::IfVersion(ref expected) => match current {
                Some(blob) if blob.version.to_string() != *expected => {
                    return Ok(PutOutcome::Conflict {
                        current_version: blob.version.to_string(),
                    });
                }
                None => {
                    return Ok(PutOutcome::Conflict {
                        current_version: "0".to_string(),
                    });
                }
                _ => {}
            },
            PutCondition::Always => {}
        }

        let version = current.map_or(1, |b| b.version + 1);
        blobs.insert(
            path.to_string(),
            StoredBlob {
                data,
                version,
                last_modified: Utc::now(),
            },
        );
        drop(blobs);

        Ok(PutOutcome::Stored {
            version: version.to_string(),
        })
    }

    async fn head(&self, path: &str) -> Result<Option<BlobMeta>> {
        let blobs = self.blobs.read().map_err(|_| Error::Internal {
            message: "blob map poisoned".into(),
        })?;

        Ok(blobs.get(path).map(|b| Self::meta_for(path, b)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>> {
        let blobs = self.blobs.read().map_err(|_| Error::Internal {
            message: "blob map poisoned".into(),
        })?;

        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, blob)| Self::meta_for(path, blob))
            .collect())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.blobs
            .write()
            .map_err(|_| Error::Internal {
                message: "blob map poisoned".into(),
            })?
            .remove(path);
        Ok(())
    }
}

// ============================================================================
// object_store-backed backend
// ============================================================================

/// Blob store backed by the `object_store` crate.
///
/// This is the production backend: local filesystem for single-node
/// deployments, with the door open to S3/GCS/Azure through the same
/// [`ObjectStore`] trait. Conditional writes map onto the crate's
/// `PutMode`, so CAS behavior matches what the cloud providers enforce.
pub struct ObjectStoreBackend {
    inner: Arc<dyn ObjectStore>,
}

impl ObjectStoreBackend {
    /// Wraps an existing `object_store` implementation.
    #[must_use]
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    /// Creates a backend rooted at a local directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be used as a store root.
    pub fn local(root: impl AsRef<std::path::Path>) -> Result<Self> {
        let fs = object_store::local::LocalFileSystem::new_with_prefix(root)
            .map_err(|e| Error::storage_with_source("failed to open local store root", e))?;
        Ok(Self::new(Arc::new(fs)))
    }

    fn store_path(path: &str) -> StorePath {
        StorePath::from(path)
    }

    fn version_token(e_tag: Option<String>, version: Option<String>) -> Result<String> {
        e_tag.or(version).ok_or_else(|| Error::Internal {
            message: "backend did not return a version token".into(),
        })
    }

    /// Reads the current version of a path after a precondition failure.
    async fn current_version(&self, path: &StorePath) -> Result<String> {
        match self.inner.head(path).await {
            Ok(meta) => Self::version_token(meta.e_tag, meta.version),
            // Deleted between the failed write and this read.
            Err(object_store::Error::NotFound { .. }) => Ok("0".to_string()),
            Err(e) => Err(Error::storage_with_source("failed to read version", e)),
        }
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let store_path = Self::store_path(path);
        match self.inner.get(&store_path).await {
            Ok(result) => result
                .bytes()
                .await
                .map_err(|e| Error::storage_with_source("failed to read object body", e)),
            Err(object_store::Error::NotFound { .. }) => Err(Error::NotFound(path.to_string())),
            Err(e) => Err(Error::storage_with_source("failed to read object", e)),
        }
    }

    async fn put(&self, path: &str, data: Bytes, condition: PutCondition) -> Result<PutOutcome> {
        let store_path = Self::store_path(path);
        let mode = match condition {
            PutCondition::IfAbsent => PutMode::Create,
            PutCondition::IfVersion(version) => PutMode::Update(UpdateVersion {
                e_tag: Some(version),
                version: None,
            }),
            PutCondition::Always => PutMode::Overwrite,
        };

        let opts = PutOptions::from(mode);
        match self.inner.put_opts(&store_path, data.into(), opts).await {
            Ok(result) => Ok(PutOutcome::Stored {
                version: Self::version_token(result.e_tag, result.version)?,
            }),
            Err(
                object_store::Error::AlreadyExists { .. }
                | object_store::Error::Precondition { .. },
            ) => Ok(PutOutcome::Conflict {
                current_version: self.current_version(&store_path).await?,
            }),
            Err(e) => Err(Error::storage_with_source("failed to write object", e)),
        }
    }

    async fn head(&self, path: &str) -> Result<Option<BlobMeta>> {
        let store_path = Self::store_path(path);
        match self.inner.head(&store_path).await {
            Ok(meta) => Ok(Some(BlobMeta {
                path: path.to_string(),
                size: meta.size as u64,
                version: Self::version_token(meta.e_tag, meta.version)?,
                last_modified: Some(meta.last_modified),
            })),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(Error::storage_with_source("failed to stat object", e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>> {
        let trimmed = prefix.trim_end_matches('/');
        let store_prefix = Self::store_path(trimmed);
        let mut stream = self.inner.list(Some(&store_prefix));

        let mut out = Vec::new();
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| Error::storage_with_source("failed to list objects", e))?
        {
            out.push(BlobMeta {
                path: meta.location.to_string(),
                size: meta.size as u64,
                version: Self::version_token(meta.e_tag, meta.version)?,
                last_modified: Some(meta.last_modified),
            });
        }
        Ok(out)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let store_path = Self::store_path(path);
        match self.inner.delete(&store_path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Error::storage_with_source("failed to delete object", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_roundtrip() {
        let store = MemoryBlobStore::new();
        let data = Bytes::from("payload");

        let outcome = store
            .put("tier/a.json", data.clone(), PutCondition::Always)
            .await
            .expect("put");
        assert!(matches!(outcome, PutOutcome::Stored { ref version } if version == "1"));

        let read = store.get("tier/a.json").await.expect("get");
        assert_eq!(read, data);
    }

    #[tokio::test]
    async fn memory_get_missing_is_not_found() {
        let store = MemoryBlobStore::new();
        let err = store.get("nope.json").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn memory_if_absent_conflicts_on_second_write() {
        let store = MemoryBlobStore::new();

        let first = store
            .put("x.json", Bytes::from("a"), PutCondition::IfAbsent)
            .await
            .expect("put");
        assert!(first.is_stored());

        let second = store
            .put("x.json", Bytes::from("b"), PutCondition::IfAbsent)
            .await
            .expect("put");
        assert!(matches!(second, PutOutcome::Conflict { .. }));
    }

    #[tokio::test]
    async fn memory_if_version_detects_stale_token() {
        let store = MemoryBlobStore::new();

        let PutOutcome::Stored { version } = store
            .put("x.json", Bytes::from("v1"), PutCondition::Always)
            .await
            .expect("put")
        else {
            panic!("expected stored");
        };

        let ok = store
            .put(
                "x.json",
                Bytes::from("v2"),
                PutCondition::IfVersion(version.clone()),
            )
            .await
            .expect("put");
        assert!(ok.is_stored());

        let stale = store
            .put("x.json", Bytes::from("v3"), PutCondition::IfVersion(version))
            .await
            .expect("put");
        assert!(matches!(stale, PutOutcome::Conflict { .. }));
    }

    #[tokio::test]
    async fn memory_if_version_on_missing_object_conflicts() {
        let store = MemoryBlobStore::new();
        let outcome = store
            .put(
                "ghost.json",
                Bytes::from("x"),
                PutCondition::IfVersion("3".into()),
            )
            .await
            .expect("put");
        assert!(matches!(
            outcome,
            PutOutcome::Conflict { ref current_version } if current_version == "0"
        ));
    }

    #[tokio::test]
    async fn memory_list_respects_prefix_boundaries() {
        let store = MemoryBlobStore::new();
        for path in ["bronze/fx/EURUSD/1.json", "bronze/fx/GBPUSD/1.json", "bronze/fx2/X/1.json"] {
            store
                .put(path, Bytes::from("r"), PutCondition::Always)
                .await
                .expect("put");
        }

        let listed = store.list("bronze/fx/").await.expect("list");
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|m| m.path.starts_with("bronze/fx/")));
    }

    #[tokio::test]
    async fn memory_delete_is_idempotent() {
        let store = MemoryBlobStore::new();
        store
            .put("d.json", Bytes::from("x"), PutCondition::Always)
            .await
            .expect("put");

        store.delete("d.json").await.expect("delete");
        store.delete("d.json").await.expect("delete again");
        assert!(store.head("d.json").await.expect("head").is_none());
    }

    #[tokio::test]
    async fn local_backend_cas_semantics() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ObjectStoreBackend::local(dir.path()).expect("backend");

        let first = store
            .put("sys/lock.json", Bytes::from("a"), PutCondition::IfAbsent)
            .await
            .expect("put");
        assert!(first.is_stored());

        let second = store
            .put("sys/lock.json", Bytes::from("b"), PutCondition::IfAbsent)
            .await
            .expect("put");
        assert!(matches!(second, PutOutcome::Conflict { .. }));

        let read = store.get("sys/lock.json").await.expect("get");
        assert_eq!(read, Bytes::from("a"));
    }

    #[tokio::test]
    async fn local_backend_list_and_head() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ObjectStoreBackend::local(dir.path()).expect("backend");

        store
            .put("silver/eq/AAPL/2026-01-05.json", Bytes::from("{}"), PutCondition::Always)
            .await
            .expect("put");
        store
            .put("silver/eq/MSFT/2026-01-05.json", Bytes::from("{}"), PutCondition::Always)
            .await
            .expect("put");

        let listed = store.list("silver/eq/").await.expect("list");
        assert_eq!(listed.len(), 2);

        let meta = store
            .head("silver/eq/AAPL/2026-01-05.json")
            .await
            .expect("head")
            .expect("exists");
        assert_eq!(meta.size, 2);
        assert!(!meta.version.is_empty());
    }
}
