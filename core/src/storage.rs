//! Key/value storage contract for snapshots.
//!
//! The simulator persists three kinds of record, each as a JSON document
//! under its own key:
//!
//! | Key | Record |
//! |---|---|
//! | `printer:{id}` | [`PrinterInstance`](crate::printer::PrinterInstance) |
//! | `fleet` | [`Fleet`](crate::fleet::Fleet) |
//! | `settings` | [`UserSettings`](crate::settings::UserSettings) |
//!
//! Every record carries a [`Version`]. Saves pass the version they loaded and
//! the store rejects the write when someone else saved in between, so two
//! concurrent invocations on the same printer can never silently overwrite
//! each other.
//!
//! # Implementations
//!
//! - `InMemorySnapshotStore` (in `printsim-testing`): fast, deterministic tests
//! - `FileSnapshotStore` (in `printsim-runtime`): one JSON file per key
//! - `RedisSnapshotStore` (in `printsim-redis`): Lua compare-and-swap
//! - `PostgresSnapshotStore` (in `printsim-postgres`): conditional upsert

use crate::types::PrinterId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;

/// Boxed future returned by [`SnapshotStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Monotonic record version. `0` means "never saved".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    /// Version of a record that does not exist yet.
    pub const ABSENT: Self = Self(0);

    /// Wraps a raw version.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version a successful save produces.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(version: u64) -> Self {
        Self(version)
    }
}

/// Where a record lives.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StorageKey {
    /// `printer:{id}`
    Printer(PrinterId),
    /// `fleet`
    Fleet,
    /// `settings`
    Settings,
}

impl StorageKey {
    /// Key of a printer snapshot.
    #[must_use]
    pub fn printer(id: &PrinterId) -> Self {
        Self::Printer(id.clone())
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Printer(id) => write!(f, "printer:{id}"),
            Self::Fleet => f.write_str("fleet"),
            Self::Settings => f.write_str("settings"),
        }
    }
}

/// Error type for [`StorageKey`] parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid storage key: {0}")]
pub struct ParseStorageKeyError(String);

impl FromStr for StorageKey {
    type Err = ParseStorageKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fleet" => Ok(Self::Fleet),
            "settings" => Ok(Self::Settings),
            _ => match s.strip_prefix("printer:") {
                Some(id) if !id.is_empty() => Ok(Self::Printer(PrinterId::new(id))),
                _ => Err(ParseStorageKeyError(s.to_string())),
            },
        }
    }
}

/// A stored record and the version it was saved at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRecord {
    /// Version of this record
    pub version: Version,
    /// Serialized JSON document
    pub payload: Vec<u8>,
}

/// Errors that can occur during storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Optimistic concurrency conflict: the record changed since it was loaded.
    #[error("Concurrency conflict on {key}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// Key written
        key: StorageKey,
        /// Version the writer loaded
        expected: Version,
        /// Version currently stored
        actual: Version,
    },

    /// A record exists but cannot be decoded.
    #[error("Corrupt snapshot at {key}: {reason}")]
    CorruptSnapshot {
        /// Key read
        key: StorageKey,
        /// Decoder message
        reason: String,
    },

    /// A record could not be encoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Backend could not be reached; the request may succeed later.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Backend rejected the operation.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether retrying the whole load → apply → save cycle may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. } | Self::Unavailable(_))
    }
}

/// What to do when a stored snapshot cannot be decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Surface [`StorageError::CorruptSnapshot`] to the caller
    #[default]
    Fail,
    /// Replace the record with seed data and continue
    ReseedOnCorruption,
}

/// Versioned key/value store for snapshots.
///
/// # Optimistic Concurrency
///
/// `save` takes the version the caller loaded:
///
/// - `Some(Version::ABSENT)`: the key must not exist yet
/// - `Some(version)`: the stored record must be at exactly this version
/// - `None`: unconditional write
///
/// A mismatch returns [`StorageError::ConcurrencyConflict`] and writes
/// nothing.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the store can be shared as
/// `Arc<dyn SnapshotStore>`.
pub trait SnapshotStore: Send + Sync {
    /// Loads a record, or `None` when the key was never saved.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn load(&self, key: StorageKey) -> StoreFuture<'_, Option<StoredRecord>>;

    /// Writes a record and returns its new version.
    ///
    /// # Errors
    ///
    /// [`StorageError::ConcurrencyConflict`] on version mismatch, or backend
    /// failures.
    fn save(
        &self,
        key: StorageKey,
        payload: Vec<u8>,
        expected: Option<Version>,
    ) -> StoreFuture<'_, Version>;

    /// Deletes a record. Clearing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn clear(&self, key: StorageKey) -> StoreFuture<'_, ()>;

    /// Checks the backend is reachable.
    ///
    /// # Errors
    ///
    /// [`StorageError::Unavailable`] when it is not.
    fn health_check(&self) -> StoreFuture<'_, ()>;

    /// Short backend name (`memory`, `file`, `redis`, `postgres`).
    fn kind(&self) -> &'static str;
}

/// Serializes a record as JSON.
///
/// # Errors
///
/// Returns [`StorageError::SerializationError`].
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

/// Deserializes a record, reporting failures as corruption of `key`.
///
/// # Errors
///
/// Returns [`StorageError::CorruptSnapshot`].
pub fn decode<T: DeserializeOwned>(key: &StorageKey, record: &StoredRecord) -> Result<T, StorageError> {
    serde_json::from_slice(&record.payload).map_err(|e| StorageError::CorruptSnapshot {
        key: key.clone(),
        reason: e.to_string(),
    })
}

/// Checks an expected version against the stored one.
///
/// Shared by backends that compare in process.
///
/// # Errors
///
/// Returns [`StorageError::ConcurrencyConflict`] on mismatch.
pub fn check_version(key: &StorageKey, expected: Option<Version>, actual: Version) -> Result<(), StorageError> {
    match expected {
        Some(expected) if expected != actual => Err(StorageError::ConcurrencyConflict {
            key: key.clone(),
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}
