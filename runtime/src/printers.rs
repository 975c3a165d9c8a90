//! Per-printer request handling.
//!
//! Every request runs the same cycle against one snapshot:
//!
//! 1. load `printer:{id}`
//! 2. reconcile to now
//! 3. apply the operation as a pure transition
//! 4. reconcile again so newly queued work starts
//! 5. save against the loaded version
//!
//! A version conflict in step 5 restarts the cycle under the service's
//! [`RetryPolicy`]. Reads run steps 1, 2 and 5, saving only when
//! reconciliation applied a transition.

use crate::error::{Result, ServiceError};
use crate::metrics::{OperationMetrics, ReconcileMetrics};
use crate::repository;
use crate::retry::{RetryPolicy, retry_with_predicate};
use futures::future::join_all;
use printsim_core::fleet::Fleet;
use printsim_core::operations::{ActionOutcome, PrinterAction, PrinterEnvironment, PrinterReducer};
use printsim_core::printer::{LogEntry, LogLevel, PrinterInstance};
use printsim_core::reconciler::{ReconcileError, Reconciliation, reconcile};
use printsim_core::reducer::Reducer;
use printsim_core::storage::{RecoveryPolicy, SnapshotStore, StorageError, StorageKey};
use printsim_core::types::{JobId, PrinterId};
use printsim_core::view::{Capabilities, JobView, StatisticsView, StatusView, recent_logs};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Runs operations and reads against individual printer snapshots.
///
/// # Example
///
/// ```rust,no_run
/// use printsim_runtime::printers::PrinterService;
/// use printsim_core::operations::{PrinterAction, PrinterEnvironment};
/// use printsim_core::types::PrinterId;
/// # use std::sync::Arc;
/// # use printsim_core::storage::SnapshotStore;
///
/// # async fn example(store: Arc<dyn SnapshotStore>, env: PrinterEnvironment) -> printsim_runtime::error::Result<()> {
/// let printers = PrinterService::new(store, env);
/// let id = PrinterId::new("home-laser");
///
/// printers.execute(&id, PrinterAction::Pause).await?;
/// let status = printers.status(&id).await?;
/// println!("{} is {}", status.name, status.status);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PrinterService {
    store: Arc<dyn SnapshotStore>,
    env: PrinterEnvironment,
    reducer: PrinterReducer,
    retry: RetryPolicy,
    recovery: RecoveryPolicy,
}

impl std::fmt::Debug for PrinterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrinterService")
            .field("store", &self.store.kind())
            .field("env", &self.env)
            .field("retry", &self.retry)
            .field("recovery", &self.recovery)
            .finish()
    }
}

impl PrinterService {
    /// Creates a service with the default retry policy that fails on corrupt
    /// snapshots.
    #[must_use]
    pub fn new(store: Arc<dyn SnapshotStore>, env: PrinterEnvironment) -> Self {
        Self {
            store,
            env,
            reducer: PrinterReducer::new(),
            retry: RetryPolicy::default(),
            recovery: RecoveryPolicy::default(),
        }
    }

    /// Replaces the conflict retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the corruption recovery policy.
    #[must_use]
    pub const fn with_recovery_policy(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    /// Environment handed to the reducer.
    #[must_use]
    pub const fn environment(&self) -> &PrinterEnvironment {
        &self.env
    }

    /// Applies one operation and persists the result.
    ///
    /// Rejected operations change nothing the caller asked for, but the
    /// reconciliation that ran before them is still persisted when it
    /// applied transitions.
    ///
    /// # Errors
    ///
    /// [`ServiceError::PrinterNotFound`], [`ServiceError::Operation`] for a
    /// rejected action, or storage failures once retries are exhausted.
    pub async fn execute(&self, id: &PrinterId, action: PrinterAction) -> Result<ActionOutcome> {
        let operation = action.name();
        let span = tracing::info_span!("printer_operation", printer_id = %id, operation);

        async {
            let started = Instant::now();
            let result = retry_with_predicate(
                &self.retry,
                || self.try_execute(id, action.clone()),
                ServiceError::is_retryable,
            )
            .await;

            OperationMetrics::record(operation, result.is_ok(), started.elapsed());
            match &result {
                Ok(_) => tracing::info!("Operation applied"),
                Err(error) if error.is_rejection() => {
                    tracing::info!(reason = %error, "Operation rejected");
                }
                Err(error) => tracing::error!(error = %error, "Operation failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn try_execute(&self, id: &PrinterId, action: PrinterAction) -> Result<ActionOutcome> {
        let key = StorageKey::printer(id);
        let before = self
            .load_reconciled(id)
            .await?
            .ok_or_else(|| ServiceError::PrinterNotFound(id.clone()))?;
        let mut printer = before.snapshot.clone();

        match self.reducer.reduce(&mut printer, action, &self.env) {
            Ok(outcome) => {
                let mut printer = self.reconcile(&printer)?.snapshot;
                let version = repository::save(self.store.as_ref(), &key, &mut printer).await?;
                tracing::debug!(%version, status = %printer.status, "Snapshot saved");
                Ok(outcome)
            }
            Err(rejection) => {
                if before.changed() {
                    let mut reconciled = before.snapshot;
                    repository::save(self.store.as_ref(), &key, &mut reconciled).await?;
                }
                Err(rejection.into())
            }
        }
    }

    /// The reconciled snapshot of a printer.
    ///
    /// # Errors
    ///
    /// [`ServiceError::PrinterNotFound`] or storage failures.
    pub async fn snapshot(&self, id: &PrinterId) -> Result<PrinterInstance> {
        self.observe(id)
            .await?
            .ok_or_else(|| ServiceError::PrinterNotFound(id.clone()))
    }

    /// The reconciled snapshot of a printer, or `None` when none is stored.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn observe(&self, id: &PrinterId) -> Result<Option<PrinterInstance>> {
        retry_with_predicate(&self.retry, || self.try_observe(id), ServiceError::is_retryable).await
    }

    async fn try_observe(&self, id: &PrinterId) -> Result<Option<PrinterInstance>> {
        let Some(reconciliation) = self.load_reconciled(id).await? else {
            return Ok(None);
        };
        if reconciliation.changed() {
            let mut snapshot = reconciliation.snapshot;
            repository::save(self.store.as_ref(), &StorageKey::printer(id), &mut snapshot).await?;
            return Ok(Some(snapshot));
        }
        Ok(Some(reconciliation.snapshot))
    }

    /// Reconciled snapshots of several printers, loaded concurrently.
    ///
    /// Printers without a stored snapshot are left out of the map, and so
    /// are printers whose snapshot fails validation and was not reseeded.
    ///
    /// # Errors
    ///
    /// The first storage failure.
    pub async fn observe_all(
        &self,
        ids: impl IntoIterator<Item = &PrinterId>,
    ) -> Result<BTreeMap<PrinterId, PrinterInstance>> {
        let results = join_all(
            ids.into_iter()
                .map(|id| async move { (id, self.observe(id).await) }),
        )
        .await;

        let mut snapshots = BTreeMap::new();
        for (id, result) in results {
            match result {
                Ok(Some(printer)) => {
                    snapshots.insert(printer.id.clone(), printer);
                }
                Ok(None) => {}
                Err(ServiceError::Reconcile(error)) => {
                    tracing::warn!(printer_id = %id, %error, "Skipping printer with an invalid snapshot");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(snapshots)
    }

    /// Current state, consumables, jobs and warnings.
    ///
    /// # Errors
    ///
    /// See [`PrinterService::snapshot`].
    pub async fn status(&self, id: &PrinterId) -> Result<StatusView> {
        Ok(StatusView::of(&self.snapshot(id).await?))
    }

    /// Lifetime counters and the `recent` most recently finished jobs.
    ///
    /// # Errors
    ///
    /// See [`PrinterService::snapshot`].
    pub async fn statistics(&self, id: &PrinterId, recent: usize) -> Result<StatisticsView> {
        Ok(StatisticsView::of(&self.snapshot(id).await?, recent))
    }

    /// Newest `limit` activity log entries, optionally filtered by level.
    ///
    /// # Errors
    ///
    /// See [`PrinterService::snapshot`].
    pub async fn logs(&self, id: &PrinterId, limit: usize, level: Option<LogLevel>) -> Result<Vec<LogEntry>> {
        Ok(recent_logs(&self.snapshot(id).await?, limit, level))
    }

    /// What the hardware can do.
    ///
    /// # Errors
    ///
    /// See [`PrinterService::snapshot`].
    pub async fn capabilities(&self, id: &PrinterId) -> Result<Capabilities> {
        Ok(Capabilities::of(&self.snapshot(id).await?))
    }

    /// One job, wherever it is: current, queued or in history.
    ///
    /// # Errors
    ///
    /// [`ServiceError::JobNotFound`], or see [`PrinterService::snapshot`].
    pub async fn job(&self, id: &PrinterId, job_id: &JobId) -> Result<JobView> {
        let printer = self.snapshot(id).await?;
        printer
            .find_job(job_id)
            .map(|job| JobView::of(job, printer.last_updated))
            .ok_or_else(|| ServiceError::JobNotFound {
                printer_id: id.clone(),
                job_id: job_id.clone(),
            })
    }

    /// Stores a new snapshot, replacing any leftover record under its key.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn create(&self, mut printer: PrinterInstance) -> Result<PrinterInstance> {
        let key = StorageKey::printer(&printer.id);
        repository::overwrite(self.store.as_ref(), &key, &mut printer).await?;
        tracing::info!(printer_id = %printer.id, type_id = %printer.type_id, "Printer snapshot created");
        Ok(printer)
    }

    /// Deletes a printer's snapshot.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn delete(&self, id: &PrinterId) -> Result<()> {
        self.store.clear(StorageKey::printer(id)).await?;
        tracing::info!(printer_id = %id, "Printer snapshot deleted");
        Ok(())
    }

    fn reconcile(&self, printer: &PrinterInstance) -> Result<Reconciliation> {
        let reconciliation = reconcile(
            printer,
            self.env.clock.now(),
            self.env.random.as_ref(),
            &self.env.config,
        )?;
        ReconcileMetrics::record(&reconciliation.events);
        if reconciliation.changed() {
            tracing::debug!(
                printer_id = %printer.id,
                events = reconciliation.events.len(),
                "Reconciliation applied transitions"
            );
        }
        Ok(reconciliation)
    }

    /// Loads and reconciles a snapshot. Under
    /// [`RecoveryPolicy::ReseedOnCorruption`] a snapshot that fails
    /// validation is replaced like one that fails to decode.
    async fn load_reconciled(&self, id: &PrinterId) -> Result<Option<Reconciliation>> {
        let Some(loaded) = self.load_optional(id).await? else {
            return Ok(None);
        };
        match self.reconcile(&loaded) {
            Err(ServiceError::Reconcile(ReconcileError::InvalidSnapshot { reason, .. }))
                if self.recovery == RecoveryPolicy::ReseedOnCorruption =>
            {
                tracing::warn!(printer_id = %id, %reason, "Invalid snapshot, reseeding");
                match self.reseed(id).await? {
                    Some(printer) => self.reconcile(&printer).map(Some),
                    None => Ok(None),
                }
            }
            result => result.map(Some),
        }
    }

    async fn load_optional(&self, id: &PrinterId) -> Result<Option<PrinterInstance>> {
        let key = StorageKey::printer(id);
        match repository::load(self.store.as_ref(), &key).await {
            Ok(printer) => Ok(printer),
            Err(StorageError::CorruptSnapshot { reason, .. })
                if self.recovery == RecoveryPolicy::ReseedOnCorruption =>
            {
                tracing::warn!(printer_id = %id, %reason, "Corrupt snapshot, reseeding");
                self.reseed(id).await
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn reseed(&self, id: &PrinterId) -> Result<Option<PrinterInstance>> {
        let fleet: Option<Fleet> = repository::load(self.store.as_ref(), &StorageKey::Fleet).await?;
        let Some(fleet) = fleet else {
            return Ok(None);
        };
        let Some(member) = fleet.member(id) else {
            return Ok(None);
        };
        let Some(hardware) = fleet.printer_type(&member.type_id) else {
            return Ok(None);
        };
        let printer = PrinterInstance::seeded(
            member.id.clone(),
            member.name.clone(),
            &hardware,
            member.location_id.clone(),
            &self.env.config,
            self.env.clock.now(),
        );
        self.create(printer).await.map(Some)
    }
}
