//! Read-only projections of a reconciled snapshot.
//!
//! These are the shapes returned by the status, statistics, log and
//! capability queries. They are computed on demand and never persisted.

use crate::catalog::{Features, InkSystem, PaperSize};
use crate::ink::InkColor;
use crate::job::{FailureReason, JobStatus, PrintJob, Quality};
use crate::printer::{ErrorKind, LogEntry, LogLevel, PrinterInstance, PrinterStatus, Statistics};
use crate::types::{JobId, LocationId, PrinterId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One job as shown to callers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobView {
    /// Job
    pub id: JobId,
    /// Document name
    pub document_name: String,
    /// Pages
    pub pages: u32,
    /// Pages printed so far
    pub pages_printed: u32,
    /// Colour output
    pub color: bool,
    /// Quality tier
    pub quality: Quality,
    /// Lifecycle state
    pub status: JobStatus,
    /// Completion percentage, one decimal
    pub progress: f64,
    /// Seconds until finished, when known
    pub remaining_seconds: Option<u32>,
    /// Why it failed
    pub failure: Option<FailureReason>,
    /// When it was submitted
    pub submitted_at: DateTime<Utc>,
    /// When it finished
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobView {
    /// Projects a job as of `now`.
    #[must_use]
    pub fn of(job: &PrintJob, now: DateTime<Utc>) -> Self {
        Self {
            id: job.id.clone(),
            document_name: job.document_name.clone(),
            pages: job.pages,
            pages_printed: job.pages_printed,
            color: job.color,
            quality: job.quality,
            status: job.status,
            progress: (job.progress * 10.0).round() / 10.0,
            remaining_seconds: job.remaining_seconds(now),
            failure: job.failure,
            submitted_at: job.submitted_at,
            completed_at: job.completed_at,
        }
    }
}

/// Ink level of one colour.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InkView {
    /// Colour
    pub color: InkColor,
    /// Level, one decimal
    pub level: f64,
    /// At or below the low threshold
    pub low: bool,
    /// Empty
    pub depleted: bool,
}

/// An open error.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorView {
    /// Kind
    pub kind: ErrorKind,
    /// Colour, for ink errors
    pub color: Option<InkColor>,
    /// When it happened
    pub occurred_at: DateTime<Utc>,
}

/// Answer to "what is this printer doing?".
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusView {
    /// Printer
    pub id: PrinterId,
    /// Display name
    pub name: String,
    /// Brand and model
    pub model: String,
    /// Location
    pub location_id: Option<LocationId>,
    /// Operational state
    pub status: PrinterStatus,
    /// When the state was entered
    pub status_since: DateTime<Utc>,
    /// Ink per colour
    pub ink: Vec<InkView>,
    /// Sheets loaded
    pub paper_count: u32,
    /// Tray capacity
    pub paper_capacity: u32,
    /// Loaded size
    pub paper_size: PaperSize,
    /// Job on the printer
    pub current_job: Option<JobView>,
    /// Waiting jobs
    pub queue: Vec<JobView>,
    /// Open errors
    pub errors: Vec<ErrorView>,
    /// Human-readable hints (low ink, low paper, open errors)
    pub warnings: Vec<String>,
    /// Reconciled up to
    pub as_of: DateTime<Utc>,
}

impl StatusView {
    /// Projects a reconciled snapshot.
    #[must_use]
    pub fn of(printer: &PrinterInstance) -> Self {
        let now = printer.last_updated;
        let ink = printer
            .ink
            .iter()
            .map(|(color, level)| InkView {
                color,
                level: (level * 10.0).round() / 10.0,
                low: printer.ink.is_low(color),
                depleted: printer.ink.is_depleted(color),
            })
            .collect();

        Self {
            id: printer.id.clone(),
            name: printer.name.clone(),
            model: printer.hardware.display_name(),
            location_id: printer.location_id.clone(),
            status: printer.status,
            status_since: printer.status_since,
            ink,
            paper_count: printer.paper.count,
            paper_capacity: printer.paper.capacity,
            paper_size: printer.paper.size,
            current_job: printer.current_job.as_ref().map(|job| JobView::of(job, now)),
            queue: printer.queue.iter().map(|job| JobView::of(job, now)).collect(),
            errors: printer
                .errors
                .iter()
                .map(|e| ErrorView {
                    kind: e.kind,
                    color: e.color,
                    occurred_at: e.occurred_at,
                })
                .collect(),
            warnings: warnings(printer),
            as_of: now,
        }
    }
}

fn warnings(printer: &PrinterInstance) -> Vec<String> {
    let mut warnings = Vec::new();
    for color in printer.ink.depleted() {
        warnings.push(format!("{color} ink is empty"));
    }
    for color in printer
        .ink
        .low()
        .into_iter()
        .filter(|c| !printer.ink.is_depleted(*c))
    {
        warnings.push(format!("{color} ink is low"));
    }
    if printer.paper.count == 0 {
        warnings.push("paper tray is empty".to_string());
    } else if printer.paper.count * 10 <= printer.paper.capacity {
        warnings.push(format!("only {} sheets left", printer.paper.count));
    }
    for error in &printer.errors {
        match error.kind {
            ErrorKind::PaperJam => warnings.push("paper jam, clear it to continue".to_string()),
            ErrorKind::HardwareError => {
                warnings.push("hardware error, power cycle to recover".to_string());
            }
            ErrorKind::OutOfPaper | ErrorKind::InkDepleted => {}
        }
    }
    if !printer.maintenance.aligned {
        warnings.push("print heads need alignment".to_string());
    }
    warnings
}

/// Lifetime counters plus derived figures.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatisticsView {
    /// Printer
    pub id: PrinterId,
    /// Raw counters
    #[serde(flatten)]
    pub stats: Statistics,
    /// Share of finished jobs that completed, in percent
    pub success_rate: Option<f64>,
    /// Pages since the last head cleaning
    pub pages_since_cleaning: u64,
    /// Last head cleaning
    pub last_cleaning: Option<DateTime<Utc>>,
    /// Recently finished jobs, newest first
    pub recent_jobs: Vec<JobView>,
}

impl StatisticsView {
    /// Projects a reconciled snapshot.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn of(printer: &PrinterInstance, recent: usize) -> Self {
        let stats = printer.stats.clone();
        let finished = stats.jobs_completed + stats.jobs_failed;
        let success_rate = (finished > 0)
            .then(|| (stats.jobs_completed as f64 / finished as f64 * 1_000.0).round() / 10.0);

        Self {
            id: printer.id.clone(),
            stats,
            success_rate,
            pages_since_cleaning: printer.maintenance.pages_since_cleaning,
            last_cleaning: printer.maintenance.last_cleaning,
            recent_jobs: printer
                .completed_jobs
                .iter()
                .rev()
                .take(recent)
                .map(|job| JobView::of(job, printer.last_updated))
                .collect(),
        }
    }
}

/// Most recent log entries, newest first, optionally filtered by level.
#[must_use]
pub fn recent_logs(printer: &PrinterInstance, limit: usize, level: Option<LogLevel>) -> Vec<LogEntry> {
    printer
        .logs
        .iter()
        .rev()
        .filter(|entry| level.is_none_or(|l| entry.level == l))
        .take(limit)
        .cloned()
        .collect()
}

/// What the hardware can do.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Capabilities {
    /// Printer
    pub id: PrinterId,
    /// Brand and model
    pub model: String,
    /// Consumable system
    pub ink_system: InkSystem,
    /// Colour output
    pub color: bool,
    /// Colours carried
    pub colors: Vec<InkColor>,
    /// Mono pages per minute
    pub ppm_mono: u32,
    /// Colour pages per minute
    pub ppm_color: u32,
    /// Tray capacity
    pub paper_capacity: u32,
    /// Supported sizes
    pub paper_sizes: Vec<PaperSize>,
    /// Feature flags
    pub features: Features,
    /// Quality tiers accepted
    pub qualities: Vec<Quality>,
    /// Head cleaning and alignment available
    pub print_head_maintenance: bool,
}

impl Capabilities {
    /// Projects the hardware description of a snapshot.
    #[must_use]
    pub fn of(printer: &PrinterInstance) -> Self {
        let hardware = &printer.hardware;
        let mut qualities = vec![Quality::Draft, Quality::Normal, Quality::High];
        if hardware.features.photo {
            qualities.push(Quality::Photo);
        }
        Self {
            id: printer.id.clone(),
            model: hardware.display_name(),
            ink_system: hardware.ink_system,
            color: hardware.is_color(),
            colors: hardware.colors.clone(),
            ppm_mono: hardware.ppm_mono,
            ppm_color: hardware.ppm_color,
            paper_capacity: hardware.paper_capacity,
            paper_sizes: hardware.paper_sizes.clone(),
            features: hardware.features,
            qualities,
            print_head_maintenance: hardware.ink_system.has_print_heads(),
        }
    }
}
