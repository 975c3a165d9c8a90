//! In-memory snapshot store for fast, deterministic tests.

#![allow(clippy::missing_panics_doc)] // Lock poisoning is recovered, never surfaced

use printsim_core::storage::{
    SnapshotStore, StorageError, StorageKey, StoreFuture, StoredRecord, Version, check_version,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<StorageKey, StoredRecord>,
    injected_failures: VecDeque<StorageError>,
    unavailable: bool,
    saves: usize,
}

/// `BTreeMap`-backed [`SnapshotStore`] with compare-and-swap semantics.
///
/// Cloning shares the underlying map, so a test can hand one clone to a
/// service and inspect the other.
///
/// # Example
///
/// ```
/// use printsim_testing::InMemorySnapshotStore;
/// use printsim_core::storage::{SnapshotStore, StorageKey, Version};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemorySnapshotStore::new();
///
/// let v1 = store.save(StorageKey::Fleet, b"{}".to_vec(), Some(Version::ABSENT)).await?;
/// assert_eq!(v1, Version::new(1));
///
/// // A stale writer is rejected.
/// assert!(store.save(StorageKey::Fleet, b"{}".to_vec(), Some(Version::ABSENT)).await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySnapshotStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemorySnapshotStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// All stored keys, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<StorageKey> {
        self.lock().records.keys().cloned().collect()
    }

    /// Current version of a key ([`Version::ABSENT`] if missing)
    #[must_use]
    pub fn version_of(&self, key: &StorageKey) -> Version {
        self.lock()
            .records
            .get(key)
            .map_or(Version::ABSENT, |r| r.version)
    }

    /// Successful saves so far
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    /// Overwrite a record directly, bumping its version.
    ///
    /// Simulates a concurrent writer or a corrupted record.
    pub fn put_raw(&self, key: StorageKey, payload: Vec<u8>) -> Version {
        let mut inner = self.lock();
        let version = inner
            .records
            .get(&key)
            .map_or(Version::ABSENT, |r| r.version)
            .next();
        inner.records.insert(key, StoredRecord { version, payload });
        version
    }

    /// Make the next `save` fail with `error` (queued in order)
    pub fn fail_next_save(&self, error: StorageError) {
        self.lock().injected_failures.push_back(error);
    }

    /// Toggle simulated backend availability
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    fn ensure_available(inner: &Inner) -> Result<(), StorageError> {
        if inner.unavailable {
            Err(StorageError::Unavailable("in-memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn load(&self, key: StorageKey) -> StoreFuture<'_, Option<StoredRecord>> {
        Box::pin(async move {
            let inner = self.lock();
            Self::ensure_available(&inner)?;
            Ok(inner.records.get(&key).cloned())
        })
    }

    fn save(
        &self,
        key: StorageKey,
        payload: Vec<u8>,
        expected: Option<Version>,
    ) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            let mut inner = self.lock();
            Self::ensure_available(&inner)?;
            if let Some(error) = inner.injected_failures.pop_front() {
                return Err(error);
            }
            let actual = inner
                .records
                .get(&key)
                .map_or(Version::ABSENT, |r| r.version);
            check_version(&key, expected, actual)?;

            let version = actual.next();
            inner.records.insert(key, StoredRecord { version, payload });
            inner.saves += 1;
            Ok(version)
        })
    }

    fn clear(&self, key: StorageKey) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.lock();
            Self::ensure_available(&inner)?;
            inner.records.remove(&key);
            Ok(())
        })
    }

    fn health_check(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { Self::ensure_available(&self.lock()) })
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
