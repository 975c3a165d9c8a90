//! Print job lifecycle.
//!
//! ```text
//! queued ──start──▶ printing ──finish──▶ completed
//!    │                 │
//!    │                 ├──fault/depletion──▶ failed
//!    └──────cancel─────┴──cancel───────────▶ cancelled
//! ```
//!
//! Progress is never accumulated. It is recomputed from the absolute
//! `started_at` timestamp every time, which keeps reconciliation idempotent.

use crate::catalog::PaperSize;
use crate::types::JobId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Print quality tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// Fast, light coverage
    Draft,
    /// Everyday documents
    #[default]
    Normal,
    /// Presentation quality
    High,
    /// Photo prints
    Photo,
}

impl Quality {
    /// Multiplier applied to the base page time.
    #[must_use]
    pub const fn time_factor(self) -> f64 {
        match self {
            Self::Draft => 0.6,
            Self::Normal => 1.0,
            Self::High => 1.6,
            Self::Photo => 2.5,
        }
    }

    /// Ink drawn per page from each colour used, in percentage points.
    #[must_use]
    pub const fn ink_per_page(self) -> f64 {
        match self {
            Self::Draft => 0.2,
            Self::Normal => 0.4,
            Self::High => 0.7,
            Self::Photo => 1.2,
        }
    }
}

/// Where a job is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue
    Queued,
    /// Currently on the printer
    Printing,
    /// Finished successfully
    Completed,
    /// Stopped by a fault or an exhausted resource
    Failed,
    /// Cancelled on request
    Cancelled,
}

impl JobStatus {
    /// Whether the job can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Why a job failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The tray ran empty mid-job
    OutOfPaper,
    /// A colour the job needed ran empty
    InkDepleted,
    /// Simulated paper jam
    PaperJam,
    /// Simulated hardware fault
    HardwareError,
    /// The printer was powered off or cycled while printing
    Interrupted,
}

impl FailureReason {
    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OutOfPaper => "out_of_paper",
            Self::InkDepleted => "ink_depleted",
            Self::PaperJam => "paper_jam",
            Self::HardwareError => "hardware_error",
            Self::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to print a document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Name shown in queues and logs
    pub document_name: String,
    /// Number of pages, at least 1
    pub pages: u32,
    /// Colour output
    #[serde(default)]
    pub color: bool,
    /// Quality tier; the printer's default when omitted
    #[serde(default)]
    pub quality: Option<Quality>,
    /// Paper size; whatever is loaded when omitted
    #[serde(default)]
    pub paper_size: Option<PaperSize>,
}

impl JobRequest {
    /// A mono, normal-quality request.
    #[must_use]
    pub fn new(document_name: impl Into<String>, pages: u32) -> Self {
        Self {
            document_name: document_name.into(),
            pages,
            color: false,
            quality: None,
            paper_size: None,
        }
    }

    /// Same request in colour.
    #[must_use]
    pub fn in_color(mut self) -> Self {
        self.color = true;
        self
    }

    /// Same request at a given quality.
    #[must_use]
    pub const fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }
}

/// Estimated duration of a job in whole seconds, at least 1.
///
/// `pages * 60 / ppm * quality_factor * speed_multiplier`, rounded up.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn estimate_seconds(pages: u32, quality: Quality, ppm: u32, speed_multiplier: f64) -> u32 {
    let per_page = 60.0 / f64::from(ppm.max(1));
    let seconds = f64::from(pages) * per_page * quality.time_factor() * speed_multiplier;
    if seconds.is_finite() && seconds > 1.0 {
        seconds.ceil().min(f64::from(u32::MAX)) as u32
    } else {
        1
    }
}

/// A single print job, owned by exactly one printer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrintJob {
    /// Job identifier
    pub id: JobId,
    /// Document name
    pub document_name: String,
    /// Total pages
    pub pages: u32,
    /// Colour output
    pub color: bool,
    /// Quality tier
    pub quality: Quality,
    /// Paper size
    pub paper_size: PaperSize,
    /// Lifecycle state
    pub status: JobStatus,
    /// Completion percentage in `[0, 100]`
    pub progress: f64,
    /// Pages whose ink and paper have been charged
    #[serde(default)]
    pub pages_printed: u32,
    /// When the job entered the queue
    pub submitted_at: DateTime<Utc>,
    /// When printing began
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Expected printing time
    pub estimated_seconds: u32,
    /// Closed pause intervals, in milliseconds
    #[serde(default)]
    pub paused_ms: i64,
    /// Start of the currently open pause
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    /// Why the job failed
    #[serde(default)]
    pub failure: Option<FailureReason>,
}

impl PrintJob {
    /// Creates a queued job.
    #[must_use]
    pub fn queued(
        id: JobId,
        request: &JobRequest,
        quality: Quality,
        paper_size: PaperSize,
        estimated_seconds: u32,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            document_name: request.document_name.trim().to_string(),
            pages: request.pages,
            color: request.color,
            quality,
            paper_size,
            status: JobStatus::Queued,
            progress: 0.0,
            pages_printed: 0,
            submitted_at,
            started_at: None,
            completed_at: None,
            estimated_seconds: estimated_seconds.max(1),
            paused_ms: 0,
            paused_at: None,
            failure: None,
        }
    }

    /// Expected printing time in milliseconds.
    #[must_use]
    pub fn estimated_ms(&self) -> i64 {
        i64::from(self.estimated_seconds.max(1)) * 1_000
    }

    /// Moves a queued job onto the printer.
    pub fn start(&mut self, at: DateTime<Utc>) {
        self.status = JobStatus::Printing;
        self.started_at = Some(at);
        self.progress = 0.0;
    }

    /// Milliseconds spent actually printing as of `now`, excluding pauses.
    #[must_use]
    pub fn active_elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        let Some(started_at) = self.started_at else {
            return 0;
        };
        let until = self.paused_at.map_or(now, |paused| paused.min(now));
        ((until - started_at).num_milliseconds() - self.paused_ms).max(0)
    }

    /// `min(100, elapsed / estimated * 100)`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_at(&self, now: DateTime<Utc>) -> f64 {
        let ratio = self.active_elapsed_ms(now) as f64 / self.estimated_ms() as f64;
        (ratio * 100.0).clamp(0.0, 100.0)
    }

    /// Pages whose boundary has been crossed by `now`.
    #[must_use]
    pub fn pages_due_at(&self, now: DateTime<Utc>) -> u32 {
        let elapsed = i128::from(self.active_elapsed_ms(now));
        let due = elapsed * i128::from(self.pages) / i128::from(self.estimated_ms());
        u32::try_from(due.clamp(0, i128::from(self.pages))).unwrap_or(self.pages)
    }

    /// Pages fed by `now`: the finished ones plus the one in the printer.
    #[must_use]
    pub fn pages_started_at(&self, now: DateTime<Utc>) -> u32 {
        if self.is_finished_at(now) {
            self.pages
        } else {
            (self.pages_due_at(now) + 1).min(self.pages)
        }
    }

    /// Instant at which page `page` (1-based) finishes, which is also when
    /// page `page + 1` is fed.
    #[must_use]
    pub fn page_instant(&self, page: u32) -> DateTime<Utc> {
        let started_at = self.started_at.unwrap_or(self.submitted_at);
        let offset = self.estimated_ms() * i64::from(page) / i64::from(self.pages.max(1));
        started_at + Duration::milliseconds(self.paused_ms + offset)
    }

    /// Instant at which the last page finishes.
    #[must_use]
    pub fn finish_instant(&self) -> DateTime<Utc> {
        self.page_instant(self.pages)
    }

    /// Whether printing time has run out as of `now`.
    #[must_use]
    pub fn is_finished_at(&self, now: DateTime<Utc>) -> bool {
        self.active_elapsed_ms(now) >= self.estimated_ms()
    }

    /// Freezes progress while the printer is paused.
    pub fn pause(&mut self, at: DateTime<Utc>) {
        if self.status == JobStatus::Printing && self.paused_at.is_none() {
            self.paused_at = Some(at);
        }
    }

    /// Closes the open pause interval.
    pub fn resume(&mut self, at: DateTime<Utc>) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_ms += (at - paused_at).num_milliseconds().max(0);
        }
    }

    /// Marks the job completed at its finish instant.
    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.pages_printed = self.pages;
        self.completed_at = Some(at);
        self.paused_at = None;
    }

    /// Marks the job failed; progress freezes at the pages actually printed.
    pub fn fail(&mut self, reason: FailureReason, at: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.failure = Some(reason);
        self.progress = self.printed_share();
        self.completed_at = Some(at);
        self.paused_at = None;
    }

    /// Marks the job cancelled; progress freezes where it was.
    pub fn cancel(&mut self, at: DateTime<Utc>) {
        if self.status == JobStatus::Printing {
            self.progress = self.progress_at(at).min(100.0);
        }
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(at);
        self.paused_at = None;
    }

    /// Seconds left until the job finishes, for printing jobs.
    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<u32> {
        match self.status {
            JobStatus::Printing => {
                let left = (self.estimated_ms() - self.active_elapsed_ms(now)).max(0);
                u32::try_from((left + 999) / 1_000).ok()
            }
            JobStatus::Queued => Some(self.estimated_seconds),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn printed_share(&self) -> f64 {
        (f64::from(self.pages_printed) / f64::from(self.pages.max(1)) * 100.0).clamp(0.0, 100.0)
    }
}
