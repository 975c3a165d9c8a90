//! Integration tests for registry CRUD, routing and user settings.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use printsim_core::config::SimulationConfig;
use printsim_core::fleet::{FleetError, Location, LocationPatch};
use printsim_core::job::{JobRequest, Quality};
use printsim_core::operations::{PrinterAction, PrinterEnvironment};
use printsim_core::printer::PrinterStatus;
use printsim_core::routing::{PrintNeeds, RoutingError, SkipReason};
use printsim_core::settings::{ResponseStyle, UserSettingsPatch};
use printsim_core::storage::{StorageKey, encode};
use printsim_core::types::{LocationId, PrinterId, PrinterTypeId};
use printsim_runtime::error::ServiceError;
use printsim_runtime::{FleetService, HealthStatus, NewPrinter, PrintRequest, PrintResult, RetryPolicy};
use printsim_testing::{InMemorySnapshotStore, NeverRandom, test_clock};
use std::sync::Arc;

fn service(store: &InMemorySnapshotStore) -> FleetService {
    let env = PrinterEnvironment::new(
        Arc::new(test_clock()),
        Arc::new(NeverRandom),
        SimulationConfig::without_faults(),
    );
    FleetService::new(Arc::new(store.clone()), env).with_retry_policy(RetryPolicy::none())
}

async fn seeded() -> (InMemorySnapshotStore, FleetService) {
    let store = InMemorySnapshotStore::new();
    let fleet = service(&store);
    fleet.bootstrap().await.unwrap();
    (store, fleet)
}

fn home() -> LocationId {
    LocationId::new("home-office")
}

fn print(document: &str) -> PrintRequest {
    PrintRequest {
        job: JobRequest::new(document, 2),
        location_id: None,
        confirmed_fallback: false,
    }
}

async fn empty_tray(fleet: &FleetService, id: &str) {
    fleet
        .printers()
        .execute(&PrinterId::new(id), PrinterAction::SetPaperCount { count: 0 })
        .await
        .unwrap();
}

#[tokio::test]
async fn bootstrap_seeds_exactly_once() {
    let store = InMemorySnapshotStore::new();
    let fleet = service(&store);

    assert_eq!(fleet.fleet().await.unwrap_err(), ServiceError::NotInitialized);
    assert!(fleet.bootstrap().await.unwrap());
    assert!(!fleet.bootstrap().await.unwrap());

    assert_eq!(fleet.locations().await.unwrap().len(), 2);
    let printers = fleet.list_printers(None).await.unwrap();
    assert_eq!(printers.len(), 4);
    assert!(printers.iter().all(|p| p.status == Some(PrinterStatus::Ready)));
    assert_eq!(printers.iter().filter(|p| p.is_default).count(), 2);

    let settings = fleet.settings().await.unwrap();
    assert_eq!(settings.current_location, Some(home()));
    assert!(settings.ask_before_switch);
}

#[tokio::test]
async fn print_goes_to_the_default_printer() {
    let (_, fleet) = seeded().await;

    let PrintResult::Queued { route, .. } = fleet.print(print("letter.pdf")).await.unwrap() else {
        panic!("expected the job to be queued");
    };
    assert_eq!(route.printer_id, PrinterId::new("home-inkjet"));
    assert!(route.was_default);
}

#[tokio::test]
async fn fallback_waits_for_confirmation() {
    let (_, fleet) = seeded().await;
    empty_tray(&fleet, "home-inkjet").await;

    let result = fleet.print(print("letter.pdf")).await.unwrap();
    let PrintResult::ConfirmationRequired { route } = result else {
        panic!("expected a confirmation request, got {result:?}");
    };
    assert_eq!(route.printer_id, PrinterId::new("home-laser"));
    assert_eq!(route.fallback_reason, Some(SkipReason::OutOfPaper));

    // Nothing was queued anywhere.
    let listing = fleet.list_printers(Some(&home())).await.unwrap();
    assert!(listing.iter().all(|p| p.pending_jobs == 0));

    let confirmed = PrintRequest {
        confirmed_fallback: true,
        ..print("letter.pdf")
    };
    let PrintResult::Queued { route, .. } = fleet.print(confirmed).await.unwrap() else {
        panic!("expected the confirmed job to be queued");
    };
    assert_eq!(route.printer_id, PrinterId::new("home-laser"));
}

#[tokio::test]
async fn fallback_without_asking_when_the_user_opted_out() {
    let (_, fleet) = seeded().await;
    fleet
        .update_settings(UserSettingsPatch {
            ask_before_switch: Some(false),
            ..UserSettingsPatch::default()
        })
        .await
        .unwrap();
    empty_tray(&fleet, "home-inkjet").await;

    let PrintResult::Queued { route, .. } = fleet.print(print("letter.pdf")).await.unwrap() else {
        panic!("expected the job to be queued");
    };
    assert_eq!(route.printer_id, PrinterId::new("home-laser"));
    assert!(!route.was_default);
}

#[tokio::test]
async fn invalid_snapshots_are_skipped_by_routing_and_listing() {
    let (store, fleet) = seeded().await;
    let inkjet = PrinterId::new("home-inkjet");
    let mut broken = fleet.printers().snapshot(&inkjet).await.unwrap();
    broken.paper.capacity = 0;
    store.put_raw(StorageKey::printer(&inkjet), encode(&broken).unwrap());

    let listing = fleet.list_printers(Some(&home())).await.unwrap();
    let summary = listing.iter().find(|p| p.id == inkjet).unwrap();
    assert_eq!(summary.status, None);

    let route = fleet
        .find_best_printer(Some(&home()), PrintNeeds::default())
        .await
        .unwrap();
    assert_eq!(route.printer_id, PrinterId::new("home-laser"));
    assert_eq!(route.fallback_reason, Some(SkipReason::Offline));

    let confirmed = PrintRequest {
        confirmed_fallback: true,
        ..print("letter.pdf")
    };
    let PrintResult::Queued { route, .. } = fleet.print(confirmed).await.unwrap() else {
        panic!("expected the job to be queued on the fallback");
    };
    assert_eq!(route.printer_id, PrinterId::new("home-laser"));
}

#[tokio::test]
async fn no_printer_available_names_the_default_reason() {
    let (_, fleet) = seeded().await;
    empty_tray(&fleet, "home-inkjet").await;
    empty_tray(&fleet, "home-laser").await;

    let err = fleet
        .find_best_printer(Some(&home()), PrintNeeds::default())
        .await
        .unwrap_err();
    let ServiceError::Routing(RoutingError::NoPrinterAvailable { reason, skipped, .. }) = err else {
        panic!("expected no printer available, got {err:?}");
    };
    assert_eq!(reason, SkipReason::OutOfPaper);
    assert_eq!(skipped.len(), 2);
}

#[tokio::test]
async fn photo_requests_fall_back_to_a_photo_printer() {
    let (_, fleet) = seeded().await;
    fleet
        .set_default_printer(&home(), &PrinterId::new("home-laser"))
        .await
        .unwrap();

    let photo = |confirmed_fallback| PrintRequest {
        job: JobRequest::new("photo.jpg", 1).with_quality(Quality::Photo),
        location_id: None,
        confirmed_fallback,
    };
    let result = fleet.print(photo(false)).await.unwrap();
    let PrintResult::ConfirmationRequired { route } = result else {
        panic!("expected a confirmation request, got {result:?}");
    };
    assert_eq!(route.fallback_reason, Some(SkipReason::Unsupported));

    let PrintResult::Queued { route, .. } = fleet.print(photo(true)).await.unwrap() else {
        panic!("expected the photo to be queued");
    };
    assert_eq!(route.printer_id, PrinterId::new("home-inkjet"));
}

#[tokio::test]
async fn service_debug_names_the_backend() {
    let (_, fleet) = seeded().await;
    let debug = format!("{fleet:?}");
    assert!(debug.starts_with("FleetService"));
    assert!(debug.contains("memory"));
}

#[tokio::test]
async fn colour_requests_skip_mono_printers() {
    let (_, fleet) = seeded().await;
    let needs = PrintNeeds {
        color: true,
        ..PrintNeeds::default()
    };
    let route = fleet.find_best_printer(Some(&home()), needs).await.unwrap();
    assert_eq!(route.printer_id, PrinterId::new("home-inkjet"));

    empty_tray(&fleet, "home-inkjet").await;
    let err = fleet.find_best_printer(Some(&home()), needs).await.unwrap_err();
    assert!(matches!(err, ServiceError::Routing(RoutingError::NoPrinterAvailable { .. })));
}

#[tokio::test]
async fn registry_changes_reach_the_snapshot() {
    let (store, fleet) = seeded().await;

    let added = fleet
        .add_printer(NewPrinter {
            id: Some(PrinterId::new("den-photo")),
            name: "Den Photo".to_string(),
            type_id: PrinterTypeId::new("inkjet-home"),
            location_id: None,
        })
        .await
        .unwrap();
    assert_eq!(added.status, PrinterStatus::WarmingUp);
    assert!(store.keys().contains(&StorageKey::printer(&added.id)));

    fleet.assign_printer(&added.id, &home()).await.unwrap();
    fleet.rename_printer(&added.id, "Photo Corner").await.unwrap();

    let snapshot = fleet.printers().snapshot(&added.id).await.unwrap();
    assert_eq!(snapshot.location_id, Some(home()));
    assert_eq!(snapshot.name, "Photo Corner");

    let previous = fleet.unassign_printer(&added.id).await.unwrap();
    assert_eq!(previous, Some(home()));
    assert_eq!(fleet.printers().snapshot(&added.id).await.unwrap().location_id, None);

    let removed = fleet.remove_printer(&added.id).await.unwrap();
    assert_eq!(removed.name, "Photo Corner");
    assert!(!store.keys().contains(&StorageKey::printer(&added.id)));
    assert_eq!(
        fleet.printers().status(&added.id).await.unwrap_err(),
        ServiceError::PrinterNotFound(added.id.clone())
    );
}

#[tokio::test]
async fn removing_a_location_unassigns_but_keeps_printers() {
    let (_, fleet) = seeded().await;

    let unassigned = fleet.remove_location(&home()).await.unwrap();
    assert_eq!(unassigned.len(), 2);

    let printers = fleet.list_printers(None).await.unwrap();
    assert_eq!(printers.len(), 4);
    let inkjet = fleet.printers().snapshot(&PrinterId::new("home-inkjet")).await.unwrap();
    assert_eq!(inkjet.location_id, None);

    let settings = fleet.settings().await.unwrap();
    assert_eq!(settings.current_location, None);
    assert_eq!(
        fleet.print(print("orphan.pdf")).await.unwrap_err(),
        ServiceError::Routing(RoutingError::NoLocation)
    );
}

#[tokio::test]
async fn location_crud_and_defaults() {
    let (_, fleet) = seeded().await;
    let garage = LocationId::new("garage");

    fleet
        .add_location(Location::new(garage.clone(), "Garage"))
        .await
        .unwrap();
    let updated = fleet
        .update_location(
            &garage,
            LocationPatch {
                icon: Some("wrench".to_string()),
                ..LocationPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.icon, "wrench");

    let laser = PrinterId::new("home-laser");
    let err = fleet.set_default_printer(&garage, &laser).await.unwrap_err();
    assert!(matches!(err, ServiceError::Fleet(FleetError::NotInLocation { .. })));

    fleet.assign_printer(&laser, &garage).await.unwrap();
    fleet.set_default_printer(&garage, &laser).await.unwrap();
    let route = fleet
        .find_best_printer(Some(&garage), PrintNeeds::default())
        .await
        .unwrap();
    assert!(route.was_default);

    fleet.clear_default_printer(&garage).await.unwrap();
    let route = fleet
        .find_best_printer(Some(&garage), PrintNeeds::default())
        .await
        .unwrap();
    assert_eq!(route.fallback_reason, Some(SkipReason::NoDefault));
    assert!(!route.is_substitution());
}

#[tokio::test]
async fn settings_reject_unknown_locations() {
    let (_, fleet) = seeded().await;

    let err = fleet
        .set_current_location(&LocationId::new("moon-base"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Fleet(FleetError::LocationNotFound(_))));

    let settings = fleet
        .update_settings(UserSettingsPatch {
            response_style: Some(ResponseStyle::Technical),
            ..UserSettingsPatch::default()
        })
        .await
        .unwrap();
    assert_eq!(settings.response_style, ResponseStyle::Technical);

    let settings = fleet
        .set_current_location(&LocationId::new("main-office"))
        .await
        .unwrap();
    assert_eq!(settings.current_location, Some(LocationId::new("main-office")));
    assert_eq!(settings.response_style, ResponseStyle::Technical);
}

#[tokio::test]
async fn reset_restores_the_default_fleet() {
    let (store, fleet) = seeded().await;
    fleet
        .add_printer(NewPrinter {
            id: Some(PrinterId::new("extra")),
            name: "Extra".to_string(),
            type_id: PrinterTypeId::new("laser-mono"),
            location_id: Some(home()),
        })
        .await
        .unwrap();
    fleet
        .printers()
        .execute(&PrinterId::new("home-laser"), PrinterAction::Pause)
        .await
        .unwrap();

    fleet.reset().await.unwrap();

    assert_eq!(fleet.list_printers(None).await.unwrap().len(), 4);
    assert!(!store.keys().contains(&StorageKey::printer(&PrinterId::new("extra"))));
    let laser = fleet.printers().status(&PrinterId::new("home-laser")).await.unwrap();
    assert_eq!(laser.status, PrinterStatus::Ready);
}

#[tokio::test]
async fn health_reflects_bootstrap_and_storage() {
    let store = InMemorySnapshotStore::new();
    let fleet = service(&store);
    assert_eq!(fleet.health().await.status, HealthStatus::Degraded);

    fleet.bootstrap().await.unwrap();
    assert_eq!(fleet.health().await.status, HealthStatus::Healthy);

    store.set_available(false);
    assert_eq!(fleet.health().await.status, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn custom_types_can_be_registered_and_used() {
    let (_, fleet) = seeded().await;
    let mut custom = fleet
        .printer_types()
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.id == PrinterTypeId::new("laser-mono"))
        .unwrap();
    custom.id = PrinterTypeId::new("laser-mono-xl");
    custom.model = format!("{} XL", custom.model);
    custom.paper_capacity = 500;

    fleet.register_type(custom.clone()).await.unwrap();
    assert!(matches!(
        fleet.register_type(custom).await.unwrap_err(),
        ServiceError::Fleet(FleetError::Duplicate(_))
    ));

    let added = fleet
        .add_printer(NewPrinter {
            id: None,
            name: "Mailroom".to_string(),
            type_id: PrinterTypeId::new("laser-mono-xl"),
            location_id: Some(LocationId::new("main-office")),
        })
        .await
        .unwrap();
    assert_eq!(added.paper.capacity, 500);
}
