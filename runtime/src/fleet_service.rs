//! Fleet-level requests: registry CRUD, routing, printing and user settings.
//!
//! The registry (`fleet`) and user preferences (`settings`) are single
//! records updated with the same optimistic load → modify → save cycle as
//! printer snapshots. Registry changes that affect a printer's name or
//! location are mirrored onto its snapshot afterwards.

use crate::error::{Result, ServiceError};
use crate::health::{HealthCheck, HealthReport, check_store};
use crate::printers::PrinterService;
use crate::repository;
use crate::retry::{RetryPolicy, retry_with_predicate};
use futures::future::try_join_all;
use printsim_core::catalog::PrinterType;
use printsim_core::fleet::{Fleet, FleetError, FleetMember, Location, LocationPatch};
use printsim_core::job::JobRequest;
use printsim_core::operations::{ActionOutcome, PrinterAction, PrinterEnvironment};
use printsim_core::printer::{PrinterInstance, PrinterStatus};
use printsim_core::routing::{self, PrintNeeds, PrintPlan, Route, RoutingError};
use printsim_core::seed::{SeedData, default_fleet};
use printsim_core::settings::{UserSettings, UserSettingsPatch};
use printsim_core::storage::{RecoveryPolicy, SnapshotStore, StorageError, StorageKey};
use printsim_core::types::{LocationId, PrinterId, PrinterTypeId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A printer to add to the fleet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPrinter {
    /// Identifier; generated when absent
    #[serde(default)]
    pub id: Option<PrinterId>,
    /// Display name
    pub name: String,
    /// Built-in or registered type
    pub type_id: PrinterTypeId,
    /// Location to place it in
    #[serde(default)]
    pub location_id: Option<LocationId>,
}

/// One row of a fleet listing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PrinterSummary {
    /// Printer
    pub id: PrinterId,
    /// Display name
    pub name: String,
    /// Template
    pub type_id: PrinterTypeId,
    /// Location
    pub location_id: Option<LocationId>,
    /// Whether it is its location's default
    pub is_default: bool,
    /// Reconciled state; `None` when no snapshot is stored
    pub status: Option<PrinterStatus>,
    /// Jobs queued or printing
    pub pending_jobs: usize,
}

/// A print request routed through a location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrintRequest {
    /// Document to print
    #[serde(flatten)]
    pub job: JobRequest,
    /// Location; the user's current location when absent
    #[serde(default)]
    pub location_id: Option<LocationId>,
    /// The user already agreed to a substitute printer
    #[serde(default)]
    pub confirmed_fallback: bool,
}

/// What happened to a print request.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PrintResult {
    /// The job was queued on the routed printer
    Queued {
        /// Where it went and why
        route: Route,
        /// What the printer reported
        outcome: ActionOutcome,
    },
    /// The default is unavailable and the user must approve the substitute
    ConfirmationRequired {
        /// The substitute that would be used
        route: Route,
    },
}

/// Registry, routing and settings on top of a [`PrinterService`].
///
/// # Example
///
/// ```rust,no_run
/// use printsim_runtime::fleet_service::{FleetService, PrintRequest, PrintResult};
/// use printsim_core::job::JobRequest;
/// # use std::sync::Arc;
/// # use printsim_core::storage::SnapshotStore;
/// # use printsim_core::operations::PrinterEnvironment;
///
/// # async fn example(store: Arc<dyn SnapshotStore>, env: PrinterEnvironment) -> printsim_runtime::error::Result<()> {
/// let fleet = FleetService::new(store, env);
/// fleet.bootstrap().await?;
///
/// let request = PrintRequest {
///     job: JobRequest::new("report.pdf", 3),
///     location_id: None,
///     confirmed_fallback: false,
/// };
/// match fleet.print(request).await? {
///     PrintResult::Queued { route, .. } => println!("Printing on {}", route.printer_name),
///     PrintResult::ConfirmationRequired { route } => println!("Use {} instead?", route.printer_name),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FleetService {
    store: Arc<dyn SnapshotStore>,
    printers: PrinterService,
    retry: RetryPolicy,
    recovery: RecoveryPolicy,
}

impl std::fmt::Debug for FleetService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetService")
            .field("store", &self.store.kind())
            .field("retry", &self.retry)
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

impl FleetService {
    /// Creates a service sharing `store` with its [`PrinterService`].
    #[must_use]
    pub fn new(store: Arc<dyn SnapshotStore>, env: PrinterEnvironment) -> Self {
        Self {
            printers: PrinterService::new(Arc::clone(&store), env),
            store,
            retry: RetryPolicy::default(),
            recovery: RecoveryPolicy::default(),
        }
    }

    /// Replaces the conflict retry policy, here and on the printer service.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.printers = self.printers.with_retry_policy(retry.clone());
        self.retry = retry;
        self
    }

    /// Replaces the corruption recovery policy, here and on the printer
    /// service.
    #[must_use]
    pub fn with_recovery_policy(mut self, recovery: RecoveryPolicy) -> Self {
        self.printers = self.printers.with_recovery_policy(recovery);
        self.recovery = recovery;
        self
    }

    /// Per-printer operations.
    #[must_use]
    pub const fn printers(&self) -> &PrinterService {
        &self.printers
    }

    // ---- Lifecycle ----

    /// Seeds the default fleet unless a registry already exists.
    ///
    /// Returns whether seeding happened. Safe to call concurrently: only
    /// one caller creates the registry.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn bootstrap(&self) -> Result<bool> {
        let corrupt = match repository::load::<Fleet>(self.store.as_ref(), &StorageKey::Fleet).await {
            Ok(Some(_)) => {
                tracing::debug!("Fleet already initialized");
                return Ok(false);
            }
            Ok(None) => false,
            Err(StorageError::CorruptSnapshot { reason, .. }) if self.reseeds() => {
                tracing::warn!(%reason, "Corrupt fleet registry, reseeding");
                true
            }
            Err(error) => return Err(error.into()),
        };

        let mut seed = self.seed_data();
        let saved = if corrupt {
            repository::overwrite(self.store.as_ref(), &StorageKey::Fleet, &mut seed.fleet).await
        } else {
            repository::save(self.store.as_ref(), &StorageKey::Fleet, &mut seed.fleet).await
        };
        match saved {
            Ok(_) => {}
            Err(StorageError::ConcurrencyConflict { .. }) => {
                tracing::debug!("Fleet seeded concurrently");
                return Ok(false);
            }
            Err(error) => return Err(error.into()),
        }
        self.write_seed_records(seed).await?;
        tracing::info!("Default fleet seeded");
        Ok(true)
    }

    /// Deletes every printer snapshot and restores the default fleet.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn reset(&self) -> Result<()> {
        if let Ok(Some(fleet)) =
            repository::load::<Fleet>(self.store.as_ref(), &StorageKey::Fleet).await
        {
            try_join_all(fleet.printers.iter().map(|member| self.printers.delete(&member.id))).await?;
        }

        let mut seed = self.seed_data();
        repository::overwrite(self.store.as_ref(), &StorageKey::Fleet, &mut seed.fleet).await?;
        self.write_seed_records(seed).await?;
        tracing::info!("Fleet reset to defaults");
        Ok(())
    }

    /// Checks storage and whether the registry exists.
    pub async fn health(&self) -> HealthReport {
        let storage = check_store(self.store.as_ref()).await;
        let registry = match repository::load::<Fleet>(self.store.as_ref(), &StorageKey::Fleet).await {
            Ok(Some(fleet)) => HealthCheck::healthy("fleet")
                .with_metadata("locations", fleet.locations.len().to_string())
                .with_metadata("printers", fleet.printers.len().to_string()),
            Ok(None) => HealthCheck::degraded("fleet", "Fleet not initialized"),
            Err(error) => HealthCheck::unhealthy("fleet", error.to_string()),
        };
        HealthReport::new(vec![storage, registry])
    }

    // ---- Registry ----

    /// The current registry.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotInitialized`] before [`FleetService::bootstrap`],
    /// or storage failures.
    pub async fn fleet(&self) -> Result<Fleet> {
        match repository::load(self.store.as_ref(), &StorageKey::Fleet).await {
            Ok(Some(fleet)) => Ok(fleet),
            Ok(None) => Err(ServiceError::NotInitialized),
            Err(StorageError::CorruptSnapshot { reason, .. }) if self.reseeds() => {
                tracing::warn!(%reason, "Corrupt fleet registry, reseeding");
                self.reset().await?;
                repository::load(self.store.as_ref(), &StorageKey::Fleet)
                    .await?
                    .ok_or(ServiceError::NotInitialized)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Every location in creation order.
    ///
    /// # Errors
    ///
    /// See [`FleetService::fleet`].
    pub async fn locations(&self) -> Result<Vec<Location>> {
        Ok(self.fleet().await?.locations)
    }

    /// Adds a location.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Fleet`] when the registry rejects it.
    pub async fn add_location(&self, location: Location) -> Result<Location> {
        let id = location.id.clone();
        let (added, moved) = self
            .modify_fleet(|fleet| {
                let moved = location.printer_ids.clone();
                fleet.add_location(location.clone())?;
                let added = fleet
                    .location(&id)
                    .cloned()
                    .ok_or_else(|| FleetError::LocationNotFound(id.clone()))?;
                Ok((added, moved))
            })
            .await?;
        for printer_id in &moved {
            self.sync_location(printer_id, Some(id.clone())).await?;
        }
        tracing::info!(location_id = %id, "Location added");
        Ok(added)
    }

    /// Changes a location's name, icon or colour.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Fleet`] when the location is unknown.
    pub async fn update_location(&self, id: &LocationId, patch: LocationPatch) -> Result<Location> {
        self.modify_fleet(|fleet| fleet.update_location(id, patch.clone()).cloned())
            .await
    }

    /// Removes a location, unassigning its printers.
    ///
    /// Clears the user's current location when it pointed here.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Fleet`] when the location is unknown.
    pub async fn remove_location(&self, id: &LocationId) -> Result<Vec<PrinterId>> {
        let unassigned = self.modify_fleet(|fleet| fleet.remove_location(id)).await?;
        for printer_id in &unassigned {
            self.sync_location(printer_id, None).await?;
        }
        self.modify_settings(|settings| {
            if settings.current_location.as_ref() == Some(id) {
                settings.current_location = None;
            }
            Ok(())
        })
        .await?;
        tracing::info!(location_id = %id, unassigned = unassigned.len(), "Location removed");
        Ok(unassigned)
    }

    /// Moves a printer into a location.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Fleet`] when either is unknown.
    pub async fn assign_printer(&self, printer_id: &PrinterId, location_id: &LocationId) -> Result<()> {
        self.modify_fleet(|fleet| fleet.assign_printer(printer_id, location_id))
            .await?;
        self.sync_location(printer_id, Some(location_id.clone())).await
    }

    /// Removes a printer from its location.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Fleet`] when the printer is unknown.
    pub async fn unassign_printer(&self, printer_id: &PrinterId) -> Result<Option<LocationId>> {
        let previous = self
            .modify_fleet(|fleet| fleet.unassign_printer(printer_id))
            .await?;
        self.sync_location(printer_id, None).await?;
        Ok(previous)
    }

    /// Makes a member the location's default printer.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Fleet`] when the printer is not in the location.
    pub async fn set_default_printer(&self, location_id: &LocationId, printer_id: &PrinterId) -> Result<()> {
        self.modify_fleet(|fleet| fleet.set_default_printer(location_id, printer_id))
            .await
    }

    /// Removes the location's default printer.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Fleet`] when the location is unknown.
    pub async fn clear_default_printer(&self, location_id: &LocationId) -> Result<()> {
        self.modify_fleet(|fleet| fleet.clear_default_printer(location_id))
            .await
    }

    /// Registers a printer and stores its initial snapshot.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Fleet`] for an unknown type or location, a duplicate
    /// id or an empty name.
    pub async fn add_printer(&self, new: NewPrinter) -> Result<PrinterInstance> {
        let id = new.id.clone().unwrap_or_else(PrinterId::generate);
        let env = self.printers.environment();
        let now = env.clock.now();
        let instance = self
            .modify_fleet(|fleet| {
                fleet.add_printer(
                    id.clone(),
                    &new.name,
                    &new.type_id,
                    new.location_id.as_ref(),
                    &env.config,
                    now,
                )
            })
            .await?;
        self.printers.create(instance).await
    }

    /// Changes a printer's display name.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Fleet`] when the printer is unknown or the name is
    /// empty.
    pub async fn rename_printer(&self, printer_id: &PrinterId, name: &str) -> Result<()> {
        self.modify_fleet(|fleet| fleet.rename_printer(printer_id, name))
            .await?;
        self.sync(
            printer_id,
            PrinterAction::Rename {
                name: name.to_string(),
            },
        )
        .await
    }

    /// Removes a printer from the registry and deletes its snapshot.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Fleet`] when the printer is unknown.
    pub async fn remove_printer(&self, printer_id: &PrinterId) -> Result<FleetMember> {
        let member = self
            .modify_fleet(|fleet| fleet.remove_printer(printer_id))
            .await?;
        self.printers.delete(printer_id).await?;
        tracing::info!(%printer_id, "Printer removed");
        Ok(member)
    }

    /// Printers with their reconciled state, optionally limited to one
    /// location.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Fleet`] for an unknown location, or storage failures.
    pub async fn list_printers(&self, location_id: Option<&LocationId>) -> Result<Vec<PrinterSummary>> {
        let fleet = self.fleet().await?;
        let members: Vec<&FleetMember> = match location_id {
            Some(location_id) => fleet.printers_in(location_id)?,
            None => fleet.list_printers().iter().collect(),
        };
        let snapshots = self.printers.observe_all(members.iter().map(|m| &m.id)).await?;

        Ok(members
            .into_iter()
            .map(|member| {
                let snapshot = snapshots.get(&member.id);
                PrinterSummary {
                    id: member.id.clone(),
                    name: member.name.clone(),
                    type_id: member.type_id.clone(),
                    location_id: member.location_id.clone(),
                    is_default: member
                        .location_id
                        .as_ref()
                        .and_then(|l| fleet.location(l))
                        .is_some_and(|l| l.default_printer.as_ref() == Some(&member.id)),
                    status: snapshot.map(|p| p.status),
                    pending_jobs: snapshot.map_or(0, PrinterInstance::pending_jobs),
                }
            })
            .collect())
    }

    /// Built-in and registered printer types.
    ///
    /// # Errors
    ///
    /// See [`FleetService::fleet`].
    pub async fn printer_types(&self) -> Result<Vec<PrinterType>> {
        Ok(self.fleet().await?.printer_types().cloned().collect())
    }

    /// Registers a custom printer type.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Fleet`] for a duplicate or invalid type.
    pub async fn register_type(&self, printer_type: PrinterType) -> Result<()> {
        self.modify_fleet(|fleet| fleet.register_type(printer_type.clone()))
            .await
    }

    // ---- Routing ----

    /// The printer a request with `needs` would go to.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Routing`] when no location is selected or no printer
    /// is available.
    pub async fn find_best_printer(&self, location_id: Option<&LocationId>, needs: PrintNeeds) -> Result<Route> {
        let fleet = self.fleet().await?;
        let settings = self.settings().await?;
        let location_id = location_id
            .or(settings.current_location.as_ref())
            .ok_or(RoutingError::NoLocation)?;
        let members = fleet.printers_in(location_id).map_err(|_| RoutingError::LocationNotFound(location_id.clone()))?;
        let snapshots = self.printers.observe_all(members.iter().map(|m| &m.id)).await?;
        Ok(routing::find_best_printer(&fleet, location_id, &snapshots, &needs)?)
    }

    /// Routes a print request and queues it, unless the confirmation gate
    /// stops it.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Routing`] when nothing can print it, or
    /// [`ServiceError::Operation`] when the routed printer rejects it.
    pub async fn print(&self, request: PrintRequest) -> Result<PrintResult> {
        let fleet = self.fleet().await?;
        let settings = self.settings().await?;
        let location_id = request
            .location_id
            .as_ref()
            .or(settings.current_location.as_ref())
            .ok_or(RoutingError::NoLocation)?;
        let members = fleet
            .printers_in(location_id)
            .map_err(|_| RoutingError::LocationNotFound(location_id.clone()))?;
        let snapshots = self.printers.observe_all(members.iter().map(|m| &m.id)).await?;

        let plan = routing::plan_print(
            &fleet,
            &settings,
            Some(location_id),
            &request.job,
            &snapshots,
            request.confirmed_fallback,
        )?;

        match plan {
            PrintPlan::ConfirmationRequired(route) => {
                tracing::info!(
                    printer_id = %route.printer_id,
                    reason = ?route.fallback_reason,
                    "Fallback needs confirmation"
                );
                Ok(PrintResult::ConfirmationRequired { route })
            }
            PrintPlan::Submit(route) => {
                let outcome = self
                    .printers
                    .execute(&route.printer_id, PrinterAction::SubmitJob(request.job))
                    .await?;
                Ok(PrintResult::Queued { route, outcome })
            }
        }
    }

    // ---- Settings ----

    /// User settings, or the defaults when none are stored.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn settings(&self) -> Result<UserSettings> {
        match repository::load(self.store.as_ref(), &StorageKey::Settings).await {
            Ok(settings) => Ok(settings.unwrap_or_default()),
            Err(StorageError::CorruptSnapshot { reason, .. }) if self.reseeds() => {
                tracing::warn!(%reason, "Corrupt user settings, restoring defaults");
                let mut settings = self.seed_data().settings;
                repository::overwrite(self.store.as_ref(), &StorageKey::Settings, &mut settings).await?;
                Ok(settings)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Applies a partial settings update.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Fleet`] when the new current location does not exist.
    pub async fn update_settings(&self, patch: UserSettingsPatch) -> Result<UserSettings> {
        if let Some(Some(location_id)) = &patch.current_location {
            if self.fleet().await?.location(location_id).is_none() {
                return Err(FleetError::LocationNotFound(location_id.clone()).into());
            }
        }
        self.modify_settings(|settings| {
            patch.clone().apply(settings);
            Ok(())
        })
        .await
    }

    /// Sets the location used when a request names none.
    ///
    /// # Errors
    ///
    /// See [`FleetService::update_settings`].
    pub async fn set_current_location(&self, location_id: &LocationId) -> Result<UserSettings> {
        self.update_settings(UserSettingsPatch {
            current_location: Some(Some(location_id.clone())),
            ..UserSettingsPatch::default()
        })
        .await
    }

    // ---- Internals ----

    const fn reseeds(&self) -> bool {
        matches!(self.recovery, RecoveryPolicy::ReseedOnCorruption)
    }

    fn seed_data(&self) -> SeedData {
        let env = self.printers.environment();
        default_fleet(&env.config, env.clock.now())
    }

    async fn write_seed_records(&self, seed: SeedData) -> Result<()> {
        try_join_all(seed.printers.into_iter().map(|printer| self.printers.create(printer))).await?;
        let mut settings = seed.settings;
        repository::overwrite(self.store.as_ref(), &StorageKey::Settings, &mut settings).await?;
        Ok(())
    }

    async fn modify_fleet<T, F>(&self, mutate: F) -> Result<T>
    where
        F: Fn(&mut Fleet) -> std::result::Result<T, FleetError>,
    {
        retry_with_predicate(
            &self.retry,
            || self.try_modify_fleet(&mutate),
            ServiceError::is_retryable,
        )
        .await
    }

    async fn try_modify_fleet<T, F>(&self, mutate: &F) -> Result<T>
    where
        F: Fn(&mut Fleet) -> std::result::Result<T, FleetError>,
    {
        let mut fleet = self.fleet().await?;
        let value = mutate(&mut fleet)?;
        fleet.validate()?;
        repository::save(self.store.as_ref(), &StorageKey::Fleet, &mut fleet).await?;
        Ok(value)
    }

    async fn modify_settings<F>(&self, mutate: F) -> Result<UserSettings>
    where
        F: Fn(&mut UserSettings) -> std::result::Result<(), FleetError>,
    {
        retry_with_predicate(
            &self.retry,
            || self.try_modify_settings(&mutate),
            ServiceError::is_retryable,
        )
        .await
    }

    async fn try_modify_settings<F>(&self, mutate: &F) -> Result<UserSettings>
    where
        F: Fn(&mut UserSettings) -> std::result::Result<(), FleetError>,
    {
        let mut settings = self.settings().await?;
        mutate(&mut settings)?;
        repository::save(self.store.as_ref(), &StorageKey::Settings, &mut settings).await?;
        Ok(settings)
    }

    async fn sync_location(&self, printer_id: &PrinterId, location_id: Option<LocationId>) -> Result<()> {
        self.sync(printer_id, PrinterAction::Relocate { location_id }).await
    }

    /// Mirrors a registry change onto the printer's snapshot. A registry
    /// member without a snapshot is left alone.
    async fn sync(&self, printer_id: &PrinterId, action: PrinterAction) -> Result<()> {
        match self.printers.execute(printer_id, action).await {
            Ok(_) => Ok(()),
            Err(ServiceError::PrinterNotFound(_)) => {
                tracing::warn!(%printer_id, "Registry member has no snapshot");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}
