//! File-backed snapshot store against a temporary directory.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use printsim_core::config::SimulationConfig;
use printsim_core::operations::{PrinterAction, PrinterEnvironment};
use printsim_core::printer::PrinterStatus;
use printsim_core::storage::{SnapshotStore, StorageError, StorageKey, Version};
use printsim_core::types::PrinterId;
use printsim_runtime::{FileSnapshotStore, FleetService};
use printsim_testing::{NeverRandom, test_clock};
use std::sync::Arc;
use tempfile::TempDir;

fn store() -> (TempDir, FileSnapshotStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path().join("data"));
    (dir, store)
}

#[tokio::test]
async fn save_and_load_round_trip_with_versions() {
    let (_dir, store) = store();
    assert_eq!(store.load(StorageKey::Fleet).await.unwrap(), None);

    let v1 = store
        .save(StorageKey::Fleet, b"{\"a\":1}".to_vec(), Some(Version::ABSENT))
        .await
        .unwrap();
    let v2 = store
        .save(StorageKey::Fleet, b"{\"a\":2}".to_vec(), Some(v1))
        .await
        .unwrap();
    assert_eq!((v1, v2), (Version::new(1), Version::new(2)));

    let record = store.load(StorageKey::Fleet).await.unwrap().unwrap();
    assert_eq!(record.version, v2);
    assert_eq!(record.payload, b"{\"a\":2}");
}

#[tokio::test]
async fn stale_writer_is_rejected() {
    let (_dir, store) = store();
    let key = StorageKey::printer(&PrinterId::new("home-laser"));
    store.save(key.clone(), b"{}".to_vec(), None).await.unwrap();

    let err = store
        .save(key.clone(), b"{}".to_vec(), Some(Version::ABSENT))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StorageError::ConcurrencyConflict {
            key,
            expected: Version::ABSENT,
            actual: Version::new(1),
        }
    );
}

#[tokio::test]
async fn clear_is_idempotent() {
    let (_dir, store) = store();
    store.save(StorageKey::Settings, b"{}".to_vec(), None).await.unwrap();
    store.clear(StorageKey::Settings).await.unwrap();
    store.clear(StorageKey::Settings).await.unwrap();
    assert_eq!(store.load(StorageKey::Settings).await.unwrap(), None);
}

#[tokio::test]
async fn headerless_file_is_corrupt() {
    let (_dir, store) = store();
    store.health_check().await.unwrap();
    std::fs::write(store.path_for(&StorageKey::Fleet), b"{}").unwrap();

    let err = store.load(StorageKey::Fleet).await.unwrap_err();
    assert!(matches!(err, StorageError::CorruptSnapshot { .. }));

    // An unconditional write replaces it.
    let version = store.save(StorageKey::Fleet, b"{}".to_vec(), None).await.unwrap();
    assert_eq!(version, Version::new(1));
}

#[tokio::test]
async fn state_survives_a_new_process() {
    let (dir, first) = store();
    let env = || {
        PrinterEnvironment::new(
            Arc::new(test_clock()),
            Arc::new(NeverRandom),
            SimulationConfig::without_faults(),
        )
    };
    let laser = PrinterId::new("home-laser");

    let fleet = FleetService::new(Arc::new(first), env());
    fleet.bootstrap().await.unwrap();
    fleet.printers().execute(&laser, PrinterAction::Pause).await.unwrap();
    drop(fleet);

    let reopened = FleetService::new(Arc::new(FileSnapshotStore::new(dir.path().join("data"))), env());
    assert!(!reopened.bootstrap().await.unwrap());
    let status = reopened.printers().status(&laser).await.unwrap();
    assert_eq!(status.status, PrinterStatus::Paused);
    assert!(dir.path().join("data").join("printer.home-laser.json").exists());
}
