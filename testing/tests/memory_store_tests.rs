//! Tests for the in-memory snapshot store

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use printsim_core::fleet::Fleet;
use printsim_core::storage::{
    SnapshotStore, StorageError, StorageKey, Version, decode, encode,
};
use printsim_core::types::PrinterId;
use printsim_testing::{InMemorySnapshotStore, fixtures};

#[tokio::test]
async fn missing_key_loads_as_none() {
    let store = InMemorySnapshotStore::new();
    assert!(store.load(StorageKey::Fleet).await.unwrap().is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn save_and_load_printer_snapshot() {
    let store = InMemorySnapshotStore::new();
    let printer = fixtures::printer("laser-color");
    let key = StorageKey::printer(&printer.id);

    let version = store
        .save(key.clone(), encode(&printer).unwrap(), Some(Version::ABSENT))
        .await
        .unwrap();
    assert_eq!(version, Version::new(1));

    let record = store.load(key.clone()).await.unwrap().expect("record saved");
    assert_eq!(record.version, version);
    let loaded: printsim_core::printer::PrinterInstance = decode(&key, &record).unwrap();
    assert_eq!(loaded, printer);
}

#[tokio::test]
async fn stale_version_is_a_conflict() {
    let store = InMemorySnapshotStore::new();
    let fleet = encode(&Fleet::default()).unwrap();

    let v1 = store.save(StorageKey::Fleet, fleet.clone(), Some(Version::ABSENT)).await.unwrap();
    let v2 = store.save(StorageKey::Fleet, fleet.clone(), Some(v1)).await.unwrap();
    assert_eq!(v2, Version::new(2));

    let err = store
        .save(StorageKey::Fleet, fleet, Some(v1))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StorageError::ConcurrencyConflict {
            key: StorageKey::Fleet,
            expected: v1,
            actual: v2,
        }
    );
    assert!(err.is_retryable());
    assert_eq!(store.version_of(&StorageKey::Fleet), v2);
    assert_eq!(store.save_count(), 2);
}

#[tokio::test]
async fn unconditional_save_overwrites() {
    let store = InMemorySnapshotStore::new();
    store.put_raw(StorageKey::Settings, b"{}".to_vec());
    let version = store.save(StorageKey::Settings, b"{}".to_vec(), None).await.unwrap();
    assert_eq!(version, Version::new(2));
}

#[tokio::test]
async fn clear_removes_only_that_key() {
    let store = InMemorySnapshotStore::new();
    let a = StorageKey::printer(&PrinterId::new("a"));
    let b = StorageKey::printer(&PrinterId::new("b"));
    store.put_raw(a.clone(), b"{}".to_vec());
    store.put_raw(b.clone(), b"{}".to_vec());

    store.clear(a.clone()).await.unwrap();
    store.clear(a.clone()).await.unwrap();

    assert_eq!(store.keys(), vec![b]);
    assert_eq!(store.version_of(&a), Version::ABSENT);
}

#[tokio::test]
async fn injected_failures_fire_once_in_order() {
    let store = InMemorySnapshotStore::new();
    store.fail_next_save(StorageError::Unavailable("first".into()));
    store.fail_next_save(StorageError::Backend("second".into()));

    let first = store.save(StorageKey::Fleet, b"{}".to_vec(), None).await.unwrap_err();
    let second = store.save(StorageKey::Fleet, b"{}".to_vec(), None).await.unwrap_err();
    assert!(matches!(first, StorageError::Unavailable(_)));
    assert!(matches!(second, StorageError::Backend(_)));

    assert!(store.save(StorageKey::Fleet, b"{}".to_vec(), None).await.is_ok());
}

#[tokio::test]
async fn unavailable_store_fails_health_check() {
    let store = InMemorySnapshotStore::new();
    assert!(store.health_check().await.is_ok());
    assert_eq!(store.kind(), "memory");

    store.set_available(false);
    assert!(matches!(
        store.health_check().await,
        Err(StorageError::Unavailable(_))
    ));
    assert!(store.load(StorageKey::Fleet).await.is_err());

    store.set_available(true);
    assert!(store.load(StorageKey::Fleet).await.is_ok());
}

#[tokio::test]
async fn clones_share_records() {
    let store = InMemorySnapshotStore::new();
    let observer = store.clone();
    store.save(StorageKey::Settings, b"{}".to_vec(), None).await.unwrap();
    assert_eq!(observer.len(), 1);
    assert!(observer.keys().contains(&StorageKey::Settings));
}
