//! Expiring advisory lock over a named durable resource.
//!
//! The lock is the only cross-process mutual exclusion in Strata. It uses
//! the blob store as the coordination point:
//!
//! - **CAS acquisition**: a compare-and-insert of the lease document; only
//!   one writer can create it.
//! - **Expiry**: every lease carries an `expires_at`, so a crashed holder
//!   cannot wedge the resource. A later acquirer may steal an expired
//!   lease via a version-bound CAS.
//! - **Bounded wait**: acquisition polls until success or `max_wait`
//!   elapses, never indefinitely.
//!
//! A holder must call [`LockLeaseGuard::ensure_held`] before each mutating
//! step of its critical section; once the lease clock has run out the guard
//! reports [`Error::LockStolen`] and the holder must abort the remainder of
//! the section. Per-item writes are idempotent throughout Strata, so an
//! abort never leaves harmful partial state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::paths::TierPaths;
use crate::storage::{BlobStore, PutCondition, PutOutcome};

/// Base delay between acquisition attempts.
const POLL_BASE: Duration = Duration::from_millis(50);

/// Ceiling for the acquisition poll delay.
const POLL_MAX: Duration = Duration::from_secs(1);

/// Durable lease document stored at the lock path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseInfo {
    /// Name of the locked resource.
    pub lock_name: String,

    /// Unique id of the current holder.
    pub holder_id: String,

    /// When the lease was taken.
    pub acquired_at: DateTime<Utc>,

    /// When the lease stops being valid.
    pub expires_at: DateTime<Utc>,

    /// Fencing sequence, incremented on every acquisition or steal.
    #[serde(default)]
    pub sequence: u64,
}

impl LeaseInfo {
    fn new(lock_name: &str, holder_id: &str, ttl: Duration, sequence: u64) -> Self {
        let now = Utc::now();
        Self {
            lock_name: lock_name.to_string(),
            holder_id: holder_id.to_string(),
            acquired_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(30)),
            sequence,
        }
    }

    /// Returns whether this lease has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Coordinator for one named lock.
///
/// Cheap to construct; every instance gets its own holder id.
pub struct LockCoordinator {
    store: Arc<dyn BlobStore>,
    lock_name: String,
    lock_path: String,
    holder_id: String,
    ttl: Duration,
}

impl LockCoordinator {
    /// Creates a coordinator for `lock_name` with the given lease TTL.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, lock_name: impl Into<String>, ttl: Duration) -> Self {
        let lock_name = lock_name.into();
        let lock_path = TierPaths::lock(&lock_name);
        Self {
            store,
            lock_name,
            lock_path,
            holder_id: Ulid::new().to_string(),
            ttl,
        }
    }

    /// Returns the holder id this coordinator acquires under.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Acquires the lock, waiting at most `max_wait`.
    ///
    /// Polls with capped backoff. A contended, non-expired lease is never
    /// waited on past the deadline.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::LockTimeout`] when the deadline elapses, or with
    /// a storage error if the lease document cannot be read or written.
    pub async fn acquire(&self, max_wait: Duration) -> Result<LockLeaseGuard> {
        let started = Instant::now();
        let mut delay = POLL_BASE;

        loop {
            match self.try_acquire().await? {
                Attempt::Acquired(guard) => return Ok(guard),
                Attempt::Held { holder_id } => {
                    let waited = started.elapsed();
                    if waited >= max_wait {
                        tracing::debug!(
                            lock = %self.lock_name,
                            held_by = %holder_id,
                            ?waited,
                            "lock wait deadline elapsed"
                        );
                        return Err(Error::LockTimeout {
                            lock_name: self.lock_name.clone(),
                            waited,
                        });
                    }

                    let remaining = max_wait - waited;
                    tokio::time::sleep(delay.min(remaining)).await;
                    delay = (delay * 2).min(POLL_MAX);
                }
            }
        }
    }

    /// Single acquisition attempt: create-if-absent, else steal if expired.
    async fn try_acquire(&self) -> Result<Attempt> {
        let lease = LeaseInfo::new(&self.lock_name, &self.holder_id, self.ttl, 1);
        let body = encode_lease(&lease)?;

        match self
            .store
            .put(&self.lock_path, body, PutCondition::IfAbsent)
            .await?
        {
            PutOutcome::Stored { version } => {
                return Ok(Attempt::Acquired(self.guard(lease, version)));
            }
            PutOutcome::Conflict { .. } => {}
        }

        // A lease exists. Take the version first so the expiry decision is
        // bound to the exact document the CAS below will replace.
        let Some(meta) = self.store.head(&self.lock_path).await? else {
            // Released and deleted between the attempts; retry.
            return Ok(Attempt::Held {
                holder_id: "unknown".into(),
            });
        };

        let existing = match self.read_lease().await? {
            Some(info) => info,
            None => {
                return Ok(Attempt::Held {
                    holder_id: "unknown".into(),
                });
            }
        };

        if !existing.is_expired() {
            return Ok(Attempt::Held {
                holder_id: existing.holder_id,
            });
        }

        let stolen = LeaseInfo::new(
            &self.lock_name,
            &self.holder_id,
            self.ttl,
            existing.sequence.saturating_add(1),
        );
        let body = encode_lease(&stolen)?;

        match self
            .store
            .put(&self.lock_path, body, PutCondition::IfVersion(meta.version))
            .await?
        {
            PutOutcome::Stored { version } => {
                tracing::info!(
                    lock = %self.lock_name,
                    previous_holder = %existing.holder_id,
                    sequence = stolen.sequence,
                    "took over expired lease"
                );
                Ok(Attempt::Acquired(self.guard(stolen, version)))
            }
            // Someone else won the steal race.
            PutOutcome::Conflict { .. } => Ok(Attempt::Held {
                holder_id: "unknown".into(),
            }),
        }
    }

    fn guard(&self, lease: LeaseInfo, version: String) -> LockLeaseGuard {
        LockLeaseGuard {
            store: Arc::clone(&self.store),
            lock_path: self.lock_path.clone(),
            lease,
            version,
            released: false,
        }
    }

    /// Reads the current lease document, if any.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error if the document cannot be
    /// read or parsed.
    pub async fn read_lease(&self) -> Result<Option<LeaseInfo>> {
        match self.store.get(&self.lock_path).await {
            Ok(data) => {
                let info = serde_json::from_slice(&data)
                    .map_err(|e| Error::serialization(format!("parse lease: {e}")))?;
                Ok(Some(info))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns whether a non-expired lease currently exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease state could not be read.
    pub async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .read_lease()
            .await?
            .is_some_and(|info| !info.is_expired()))
    }
}

/// Outcome of one acquisition attempt.
enum Attempt {
    Acquired(LockLeaseGuard),
    Held { holder_id: String },
}

fn encode_lease(lease: &LeaseInfo) -> Result<Bytes> {
    serde_json::to_vec(lease)
        .map(Bytes::from)
        .map_err(|e| Error::serialization(format!("encode lease: {e}")))
}

/// RAII guard for a held lease.
///
/// Released explicitly via [`release`](Self::release); dropping the guard
/// falls back to a best-effort async release, with lease expiry as the
/// backstop.
pub struct LockLeaseGuard {
    store: Arc<dyn BlobStore>,
    lock_path: String,
    lease: LeaseInfo,
    /// Version of the lease document this guard wrote.
    version: String,
    released: bool,
}

impl std::fmt::Debug for LockLeaseGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockLeaseGuard")
            .field("lock_path", &self.lock_path)
            .field("lease", &self.lease)
            .field("version", &self.version)
            .field("released", &self.released)
            .finish()
    }
}

impl LockLeaseGuard {
    /// Returns the holder id of this lease.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.lease.holder_id
    }

    /// Returns the fencing sequence of this lease.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.lease.sequence
    }

    /// Returns when this lease expires.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.lease.expires_at
    }

    /// Verifies the lease is still valid before a mutating step.
    ///
    /// This is a clock check against the lease expiry. By contract no
    /// external write happens outside a held section, so an expired clock
    /// means another instance may already own the resource.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::LockStolen`] once the lease has expired; the
    /// caller must abort the rest of its critical section.
    pub fn ensure_held(&self) -> Result<()> {
        if self.lease.is_expired() {
            return Err(Error::LockStolen {
                lock_name: self.lease.lock_name.clone(),
            });
        }
        Ok(())
    }

    /// Explicitly releases the lease.
    ///
    /// Writes an expired lease document via CAS rather than deleting: if a
    /// new holder already stole the lease, the CAS fails and their lease is
    /// left untouched. The expired record stays in place for the next
    /// acquirer to overwrite.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease document cannot be written.
    pub async fn release(mut self) -> Result<()> {
        self.do_release().await
    }

    async fn do_release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }

        let expired = LeaseInfo {
            expires_at: Utc::now() - chrono::Duration::seconds(1),
            ..self.lease.clone()
        };
        let body = encode_lease(&expired)?;

        // Conflict here means a new holder took over after our expiry;
        // leave their lease alone.
        let _ = self
            .store
            .put(
                &self.lock_path,
                body,
                PutCondition::IfVersion(self.version.clone()),
            )
            .await?;

        self.released = true;
        Ok(())
    }
}

impl Drop for LockLeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // Best-effort release outside an explicit call. Without a runtime
        // (e.g. teardown paths), expiry handles cleanup.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let store = Arc::clone(&self.store);
        let lock_path = self.lock_path.clone();
        let expired = LeaseInfo {
            expires_at: Utc::now() - chrono::Duration::seconds(1),
            ..self.lease.clone()
        };
        let version = self.version.clone();

        handle.spawn(async move {
            if let Ok(body) = serde_json::to_vec(&expired) {
                let _ = store
                    .put(&lock_path, Bytes::from(body), PutCondition::IfVersion(version))
                    .await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;

    fn store() -> Arc<dyn BlobStore> {
        Arc::new(MemoryBlobStore::new())
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let store = store();
        let lock = LockCoordinator::new(store, "cross-layer-eq", Duration::from_secs(30));

        let guard = lock.acquire(Duration::from_secs(1)).await.expect("acquire");
        assert!(!guard.holder_id().is_empty());
        assert!(lock.is_locked().await.expect("locked"));

        guard.release().await.expect("release");
        assert!(!lock.is_locked().await.expect("unlocked"));
    }

    #[tokio::test]
    async fn contended_acquire_times_out_within_bound() {
        let store = store();
        let holder = LockCoordinator::new(Arc::clone(&store), "eq", Duration::from_secs(60));
        let _held = holder.acquire(Duration::from_secs(1)).await.expect("acquire");

        let contender = LockCoordinator::new(store, "eq", Duration::from_secs(60));
        let started = Instant::now();
        let err = contender
            .acquire(Duration::from_millis(150))
            .await
            .expect_err("must time out");

        assert!(err.is_lock_timeout());
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "timeout must honor the wait bound, took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn at_most_one_live_lease_per_name() {
        let store = store();
        let a = LockCoordinator::new(Arc::clone(&store), "eq", Duration::from_secs(60));
        let b = LockCoordinator::new(Arc::clone(&store), "eq", Duration::from_secs(60));

        let guard = a.acquire(Duration::from_millis(100)).await.expect("first");
        assert!(b.acquire(Duration::from_millis(100)).await.is_err());

        // Different lock names are independent resources.
        let other = LockCoordinator::new(store, "fx", Duration::from_secs(60));
        let other_guard = other
            .acquire(Duration::from_millis(100))
            .await
            .expect("other name");

        guard.release().await.expect("release");
        other_guard.release().await.expect("release other");
    }

    #[tokio::test]
    async fn expired_lease_is_stolen_with_fencing_bump() {
        let store = store();
        let first = LockCoordinator::new(Arc::clone(&store), "eq", Duration::from_millis(1));
        let stale = first.acquire(Duration::from_millis(50)).await.expect("first");
        assert_eq!(stale.sequence(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = LockCoordinator::new(store, "eq", Duration::from_secs(30));
        let fresh = second
            .acquire(Duration::from_millis(200))
            .await
            .expect("steal");

        assert_ne!(stale.holder_id(), fresh.holder_id());
        assert_eq!(fresh.sequence(), 2);
    }

    #[tokio::test]
    async fn ensure_held_reports_stolen_after_expiry() {
        let store = store();
        let lock = LockCoordinator::new(store, "eq", Duration::from_millis(5));
        let guard = lock.acquire(Duration::from_millis(50)).await.expect("acquire");

        guard.ensure_held().expect("still valid");
        tokio::time::sleep(Duration::from_millis(15)).await;

        let err = guard.ensure_held().expect_err("expired");
        assert!(matches!(err, Error::LockStolen { .. }));
    }

    #[tokio::test]
    async fn release_does_not_clobber_a_new_holder() {
        let store = store();
        let first = LockCoordinator::new(Arc::clone(&store), "eq", Duration::from_millis(1));
        let stale = first.acquire(Duration::from_millis(50)).await.expect("first");

        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = LockCoordinator::new(Arc::clone(&store), "eq", Duration::from_secs(30));
        let fresh = second
            .acquire(Duration::from_millis(200))
            .await
            .expect("steal");

        // The stale guard's release must CAS-fail and leave the new lease.
        stale.release().await.expect("stale release is a no-op");

        let current = second.read_lease().await.expect("read").expect("lease");
        assert_eq!(current.holder_id, fresh.holder_id());
        assert!(!current.is_expired());
    }

    #[tokio::test]
    async fn release_then_reacquire_bumps_sequence() {
        let store = store();
        let lock = LockCoordinator::new(Arc::clone(&store), "eq", Duration::from_secs(30));
        let guard = lock.acquire(Duration::from_millis(100)).await.expect("first");
        assert_eq!(guard.sequence(), 1);
        guard.release().await.expect("release");

        // The released (expired) record stays behind; re-acquisition goes
        // through the steal path and increments the fencing sequence.
        let again = LockCoordinator::new(store, "eq", Duration::from_secs(30));
        let guard = again.acquire(Duration::from_millis(200)).await.expect("second");
        assert_eq!(guard.sequence(), 2);
    }
}
