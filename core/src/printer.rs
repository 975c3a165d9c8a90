//! The persisted printer snapshot.

use crate::catalog::{PaperSize, PrinterType};
use crate::config::SimulationConfig;
use crate::ink::{InkColor, InkLevels};
use crate::job::{JobStatus, PrintJob, Quality};
use crate::reconciler::ReconcileError;
use crate::types::{JobId, LocationId, PrinterId, PrinterTypeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operational state of a printer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterStatus {
    /// Powered off
    Offline,
    /// Powered on, not yet ready
    WarmingUp,
    /// Idle and able to print
    Ready,
    /// Working on a job
    Printing,
    /// Held by the user
    Paused,
    /// Blocked by an unresolved error
    Error,
    /// Power-saving; wakes on new work
    Sleep,
}

impl PrinterStatus {
    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::WarmingUp => "warming_up",
            Self::Ready => "ready",
            Self::Printing => "printing",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Sleep => "sleep",
        }
    }

    /// Whether a queued job may start in this state.
    #[must_use]
    pub const fn accepts_work(self) -> bool {
        matches!(self, Self::Ready | Self::Printing)
    }
}

impl std::fmt::Display for PrinterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The input tray.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperTray {
    /// Sheets loaded
    pub count: u32,
    /// Sheets the tray holds
    pub capacity: u32,
    /// Size currently loaded
    pub size: PaperSize,
}

/// Kind of an instance-level error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Paper stuck in the feed path
    PaperJam,
    /// Generic hardware fault
    HardwareError,
    /// Tray empty
    OutOfPaper,
    /// A colour ran empty
    InkDepleted,
}

impl ErrorKind {
    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PaperJam => "paper_jam",
            Self::HardwareError => "hardware_error",
            Self::OutOfPaper => "out_of_paper",
            Self::InkDepleted => "ink_depleted",
        }
    }
}

/// An unresolved problem on the printer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrinterError {
    /// What went wrong
    pub kind: ErrorKind,
    /// Colour involved, for ink errors
    #[serde(default)]
    pub color: Option<InkColor>,
    /// Job that was active when it happened
    #[serde(default)]
    pub job_id: Option<JobId>,
    /// When it happened
    pub occurred_at: DateTime<Utc>,
}

/// Lifetime counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    /// Pages successfully printed
    pub pages_printed: u64,
    /// Sheets pulled from the tray (pages plus test pages)
    pub sheets_used: u64,
    /// Jobs completed
    pub jobs_completed: u64,
    /// Jobs failed
    pub jobs_failed: u64,
    /// Jobs cancelled
    pub jobs_cancelled: u64,
    /// Ink consumed per colour, in percentage points
    pub ink_used: BTreeMap<InkColor, f64>,
    /// Paper jams encountered
    pub paper_jams: u64,
    /// Print head cleanings performed
    pub head_cleanings: u64,
    /// Print head alignments performed
    pub alignments: u64,
    /// Nozzle checks printed
    pub nozzle_checks: u64,
    /// Power cycles
    pub power_cycles: u64,
}

impl Statistics {
    /// Adds drawn ink to the running total.
    pub fn record_ink(&mut self, color: InkColor, amount: f64) {
        if amount > 0.0 {
            *self.ink_used.entry(color).or_insert(0.0) += amount;
        }
    }
}

/// Per-instance preferences.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterSettings {
    /// Quality used when a request does not specify one
    pub default_quality: Quality,
    /// Draw 25% less ink per page
    pub eco_mode: bool,
    /// Enter sleep after this many idle minutes
    pub sleep_after_minutes: Option<u32>,
    /// Allow simulated paper jams and hardware faults
    pub fault_injection: bool,
}

impl Default for PrinterSettings {
    fn default() -> Self {
        Self {
            default_quality: Quality::Normal,
            eco_mode: false,
            sleep_after_minutes: None,
            fault_injection: true,
        }
    }
}

/// Print head upkeep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceState {
    /// Pages printed since the heads were last cleaned
    pub pages_since_cleaning: u64,
    /// Last head cleaning
    pub last_cleaning: Option<DateTime<Utc>>,
    /// Last head alignment
    pub last_alignment: Option<DateTime<Utc>>,
    /// Whether the heads are aligned
    pub aligned: bool,
}

impl Default for MaintenanceState {
    fn default() -> Self {
        Self {
            pages_since_cleaning: 0,
            last_cleaning: None,
            last_alignment: None,
            aligned: true,
        }
    }
}

/// Severity of an activity log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Routine activity
    Info,
    /// Needs attention soon
    Warning,
    /// Something failed
    Error,
}

/// One line of the printer's activity log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When it happened
    pub at: DateTime<Utc>,
    /// Severity
    pub level: LogLevel,
    /// Description
    pub message: String,
}

/// Complete persisted state of one printer.
///
/// Invariant: at most one `current_job`, which is never also in `queue`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrinterInstance {
    /// Instance identifier
    pub id: PrinterId,
    /// Display name
    pub name: String,
    /// Template this instance was created from
    pub type_id: PrinterTypeId,
    /// Hardware description copied from the template at creation
    pub hardware: PrinterType,
    /// Location membership
    #[serde(default)]
    pub location_id: Option<LocationId>,
    /// Operational state
    pub status: PrinterStatus,
    /// When `status` last changed
    pub status_since: DateTime<Utc>,
    /// Ink levels
    pub ink: InkLevels,
    /// Input tray
    pub paper: PaperTray,
    /// Jobs waiting, in submission order
    #[serde(default)]
    pub queue: Vec<PrintJob>,
    /// Job on the printer
    #[serde(default)]
    pub current_job: Option<PrintJob>,
    /// Recently finished jobs, newest last
    #[serde(default)]
    pub completed_jobs: Vec<PrintJob>,
    /// Unresolved errors
    #[serde(default)]
    pub errors: Vec<PrinterError>,
    /// Lifetime counters
    #[serde(default)]
    pub stats: Statistics,
    /// Preferences
    #[serde(default)]
    pub settings: PrinterSettings,
    /// Print head upkeep
    #[serde(default)]
    pub maintenance: MaintenanceState,
    /// Recent activity, newest last
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    /// Earliest instant the next queued job may start
    pub queue_cursor: DateTime<Utc>,
    /// When the instance was provisioned
    pub created_at: DateTime<Utc>,
    /// Instant the snapshot was last reconciled to
    pub last_updated: DateTime<Utc>,
    /// Storage version this snapshot was loaded at
    #[serde(default)]
    pub version: u64,
}

impl PrinterInstance {
    /// A freshly added printer: full ink, a partially filled tray, warming up.
    #[must_use]
    pub fn provision(
        id: PrinterId,
        name: impl Into<String>,
        hardware: &PrinterType,
        location_id: Option<LocationId>,
        config: &SimulationConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let mut instance = Self::seeded(id, name, hardware, location_id, config, now);
        instance.status = PrinterStatus::WarmingUp;
        instance
    }

    /// A seed printer that is ready immediately.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn seeded(
        id: PrinterId,
        name: impl Into<String>,
        hardware: &PrinterType,
        location_id: Option<LocationId>,
        config: &SimulationConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let fraction = config.initial_paper_fraction.clamp(0.0, 1.0);
        let paper = (f64::from(hardware.paper_capacity) * fraction).floor() as u32;
        Self {
            id,
            name: name.into(),
            type_id: hardware.id.clone(),
            hardware: hardware.clone(),
            location_id,
            status: PrinterStatus::Ready,
            status_since: now,
            ink: InkLevels::full(&hardware.colors),
            paper: PaperTray {
                count: paper.min(hardware.paper_capacity),
                capacity: hardware.paper_capacity,
                size: hardware.paper_sizes.first().copied().unwrap_or(PaperSize::A4),
            },
            queue: Vec::new(),
            current_job: None,
            completed_jobs: Vec::new(),
            errors: Vec::new(),
            stats: Statistics::default(),
            settings: PrinterSettings::default(),
            maintenance: MaintenanceState::default(),
            logs: Vec::new(),
            queue_cursor: now,
            created_at: now,
            last_updated: now,
            version: 0,
        }
    }

    /// Checks the structural invariants reconciliation relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::InvalidSnapshot`] describing the first violation.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        let invalid = |reason: String| ReconcileError::InvalidSnapshot {
            printer_id: self.id.clone(),
            reason,
        };

        if self.id.as_str().trim().is_empty() {
            return Err(invalid("printer id is empty".to_string()));
        }
        if self.paper.capacity == 0 {
            return Err(invalid("paper capacity is zero".to_string()));
        }
        if let Some(job) = &self.current_job {
            if job.status != JobStatus::Printing {
                return Err(invalid(format!(
                    "current job {} has status {:?}",
                    job.id, job.status
                )));
            }
            if job.started_at.is_none() {
                return Err(invalid(format!("current job {} has no start time", job.id)));
            }
            if self.queue.iter().any(|queued| queued.id == job.id) {
                return Err(invalid(format!(
                    "current job {} is also queued",
                    job.id
                )));
            }
        }
        for job in self.queue.iter().chain(self.current_job.iter()) {
            if job.pages == 0 {
                return Err(invalid(format!("job {} has no pages", job.id)));
            }
            if job.pages_printed > job.pages {
                return Err(invalid(format!(
                    "job {} printed more pages than it has",
                    job.id
                )));
            }
        }
        if let Some(job) = self.queue.iter().find(|j| j.status != JobStatus::Queued) {
            return Err(invalid(format!(
                "queued job {} has status {:?}",
                job.id, job.status
            )));
        }
        Ok(())
    }

    /// Changes status and records when.
    pub fn set_status(&mut self, status: PrinterStatus, at: DateTime<Utc>) {
        if self.status != status {
            self.status = status;
            self.status_since = at;
        }
    }

    /// Moves the queue cursor forward, never back.
    pub fn advance_cursor(&mut self, at: DateTime<Utc>) {
        self.queue_cursor = self.queue_cursor.max(at);
    }

    /// Appends to the activity log, keeping at most `limit` entries.
    pub fn log(&mut self, level: LogLevel, at: DateTime<Utc>, message: impl Into<String>, limit: usize) {
        self.logs.push(LogEntry {
            at,
            level,
            message: message.into(),
        });
        if self.logs.len() > limit {
            let excess = self.logs.len() - limit;
            self.logs.drain(..excess);
        }
    }

    /// Moves a finished job into the bounded history.
    pub fn archive(&mut self, job: PrintJob, limit: usize) {
        self.completed_jobs.push(job);
        if self.completed_jobs.len() > limit {
            let excess = self.completed_jobs.len() - limit;
            self.completed_jobs.drain(..excess);
        }
    }

    /// Records an error unless an identical one is already open.
    pub fn raise(&mut self, error: PrinterError) {
        let duplicate = self
            .errors
            .iter()
            .any(|open| open.kind == error.kind && open.color == error.color);
        if !duplicate {
            self.errors.push(error);
        }
    }

    /// Whether an error of this kind is open.
    #[must_use]
    pub fn has_error(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    /// Removes every open error matching the predicate; returns how many.
    pub fn resolve_errors(&mut self, mut matches: impl FnMut(&PrinterError) -> bool) -> usize {
        let before = self.errors.len();
        self.errors.retain(|e| !matches(e));
        before - self.errors.len()
    }

    /// Leaves the `error` state once nothing is left unresolved.
    pub fn recover_if_clear(&mut self, now: DateTime<Utc>) {
        if self.status == PrinterStatus::Error && self.errors.is_empty() {
            self.set_status(PrinterStatus::Ready, now);
            self.advance_cursor(now);
        }
    }

    /// Jobs on the printer or waiting for it.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.queue.len() + usize::from(self.current_job.is_some())
    }

    /// Finds a job anywhere on this printer.
    #[must_use]
    pub fn find_job(&self, job_id: &JobId) -> Option<&PrintJob> {
        self.current_job
            .iter()
            .chain(self.queue.iter())
            .chain(self.completed_jobs.iter())
            .find(|job| &job.id == job_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can unwrap
mod tests {
    use super::*;
    use crate::catalog::builtin_type;
    use crate::job::JobRequest;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn inkjet() -> PrinterInstance {
        let hardware = builtin_type("inkjet-home").unwrap();
        PrinterInstance::provision(
            PrinterId::new("p1"),
            "Den",
            &hardware,
            None,
            &SimulationConfig::default(),
            now(),
        )
    }

    #[test]
    fn provisioning_fills_ink_and_part_of_the_tray() {
        let printer = inkjet();
        assert_eq!(printer.status, PrinterStatus::WarmingUp);
        assert_eq!(printer.paper.count, 80);
        assert_eq!(printer.paper.capacity, 100);
        for color in InkColor::ALL {
            assert_eq!(printer.ink.level(color), Some(100.0));
        }
    }

    #[test]
    fn validate_rejects_current_job_also_queued() {
        let mut printer = inkjet();
        let mut job = PrintJob::queued(
            JobId::new("j1"),
            &JobRequest::new("a", 1),
            Quality::Normal,
            PaperSize::A4,
            4,
            now(),
        );
        printer.queue.push(job.clone());
        job.start(now());
        printer.current_job = Some(job);

        assert!(matches!(
            printer.validate(),
            Err(ReconcileError::InvalidSnapshot { .. })
        ));
    }

    #[test]
    fn log_is_bounded() {
        let mut printer = inkjet();
        for i in 0..10 {
            printer.log(LogLevel::Info, now(), format!("entry {i}"), 3);
        }
        assert_eq!(printer.logs.len(), 3);
        assert_eq!(printer.logs[0].message, "entry 7");
    }

    #[test]
    fn duplicate_errors_are_not_stacked() {
        let mut printer = inkjet();
        let jam = PrinterError {
            kind: ErrorKind::PaperJam,
            color: None,
            job_id: None,
            occurred_at: now(),
        };
        printer.raise(jam.clone());
        printer.raise(jam);
        assert_eq!(printer.errors.len(), 1);
    }

    #[test]
    fn older_snapshots_fill_in_defaults() {
        let printer = inkjet();
        let mut json = serde_json::to_value(&printer).unwrap();
        let object = json.as_object_mut().unwrap();
        object.remove("settings");
        object.remove("maintenance");
        object.remove("logs");
        object.remove("version");

        let restored: PrinterInstance = serde_json::from_value(json).unwrap();
        assert_eq!(restored.settings, PrinterSettings::default());
        assert!(restored.maintenance.aligned);
        assert!(restored.logs.is_empty());
    }
}
