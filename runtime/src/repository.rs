//! Typed access to the snapshot store.
//!
//! Records are JSON documents whose `version` field mirrors the store's
//! version counter. Loading overwrites the field with the stored version so
//! a snapshot always reports the version it can be saved against.

use crate::metrics::StorageMetrics;
use printsim_core::fleet::Fleet;
use printsim_core::printer::PrinterInstance;
use printsim_core::settings::UserSettings;
use printsim_core::storage::{SnapshotStore, StorageError, StorageKey, Version, decode, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A persisted record that carries its own storage version.
pub trait Versioned: Serialize + DeserializeOwned + Send {
    /// Version the record was loaded or saved at.
    fn version(&self) -> Version;

    /// Records the storage version.
    fn set_version(&mut self, version: Version);
}

macro_rules! versioned {
    ($($ty:ty),*) => {
        $(
            impl Versioned for $ty {
                fn version(&self) -> Version {
                    Version::new(self.version)
                }

                fn set_version(&mut self, version: Version) {
                    self.version = version.value();
                }
            }
        )*
    };
}

versioned!(PrinterInstance, Fleet, UserSettings);

/// Loads and decodes a record.
///
/// # Errors
///
/// Backend failures, or [`StorageError::CorruptSnapshot`] when the payload
/// does not decode.
pub async fn load<T: Versioned>(
    store: &dyn SnapshotStore,
    key: &StorageKey,
) -> Result<Option<T>, StorageError> {
    let Some(record) = store.load(key.clone()).await.inspect_err(|e| observe(store, e))? else {
        return Ok(None);
    };
    let mut value: T = decode(key, &record)?;
    value.set_version(record.version);
    Ok(Some(value))
}

/// Encodes and saves a record against its own version.
///
/// A record at [`Version::ABSENT`] is only written when the key does not
/// exist. On success the record's version is bumped to the stored one.
///
/// # Errors
///
/// [`StorageError::ConcurrencyConflict`] when someone else saved first, or
/// backend failures.
pub async fn save<T: Versioned>(
    store: &dyn SnapshotStore,
    key: &StorageKey,
    value: &mut T,
) -> Result<Version, StorageError> {
    write(store, key, value, Some(value.version())).await
}

/// Saves a record regardless of what is stored.
///
/// Used for seeding and for replacing corrupt records.
///
/// # Errors
///
/// Backend failures.
pub async fn overwrite<T: Versioned>(
    store: &dyn SnapshotStore,
    key: &StorageKey,
    value: &mut T,
) -> Result<Version, StorageError> {
    write(store, key, value, None).await
}

async fn write<T: Versioned>(
    store: &dyn SnapshotStore,
    key: &StorageKey,
    value: &mut T,
    expected: Option<Version>,
) -> Result<Version, StorageError> {
    let payload = encode(value)?;
    let version = store
        .save(key.clone(), payload, expected)
        .await
        .inspect_err(|e| observe(store, e))?;
    value.set_version(version);
    tracing::trace!(%key, %version, backend = store.kind(), "Record saved");
    Ok(version)
}

fn observe(store: &dyn SnapshotStore, error: &StorageError) {
    match error {
        StorageError::ConcurrencyConflict { key, expected, actual } => {
            StorageMetrics::record_conflict(store.kind());
            tracing::debug!(%key, %expected, %actual, "Version conflict");
        }
        other => {
            StorageMetrics::record_error(store.kind());
            tracing::warn!(backend = store.kind(), error = %other, "Storage failure");
        }
    }
}
