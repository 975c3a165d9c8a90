//! Control operations on a single printer.
//!
//! Every operation is one variant of [`PrinterAction`] and is applied by
//! [`PrinterReducer`] as a validated, pure transition. The caller reconciles
//! the snapshot before and after reducing; the reducer itself never advances
//! simulated time.
//!
//! Rejected actions return an [`OperationError`] and leave the snapshot
//! untouched.

use crate::catalog::PaperSize;
use crate::config::SimulationConfig;
use crate::environment::{Clock, RandomSource};
use crate::ink::InkColor;
use crate::job::{FailureReason, JobRequest, JobStatus, PrintJob, Quality, estimate_seconds};
use crate::printer::{ErrorKind, LogLevel, PrinterInstance, PrinterSettings, PrinterStatus};
use crate::reconciler::fail_job;
use crate::reducer::Reducer;
use crate::types::{JobId, LocationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Ink drawn from every colour by one head cleaning, in percentage points.
pub const CLEANING_INK_DRAW: f64 = 1.5;

/// Pages after which a nozzle check starts showing streaks.
pub const STREAK_THRESHOLD_PAGES: u64 = 1_500;

/// Dependencies injected into the printer reducer.
#[derive(Clone)]
pub struct PrinterEnvironment {
    /// Wall clock
    pub clock: Arc<dyn Clock>,
    /// Fault injection randomness
    pub random: Arc<dyn RandomSource>,
    /// Simulation tunables
    pub config: SimulationConfig,
}

impl PrinterEnvironment {
    /// Creates an environment.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        config: SimulationConfig,
    ) -> Self {
        Self {
            clock,
            random,
            config,
        }
    }
}

impl std::fmt::Debug for PrinterEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrinterEnvironment")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Partial update of [`PrinterSettings`]; absent fields are left alone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    /// Quality used when a request omits one
    pub default_quality: Option<Quality>,
    /// Eco mode toggle
    pub eco_mode: Option<bool>,
    /// Idle minutes before sleeping; `0` disables auto-sleep
    pub sleep_after_minutes: Option<u32>,
    /// Simulated fault toggle
    pub fault_injection: Option<bool>,
}

impl SettingsPatch {
    fn apply(&self, settings: &mut PrinterSettings) {
        if let Some(quality) = self.default_quality {
            settings.default_quality = quality;
        }
        if let Some(eco) = self.eco_mode {
            settings.eco_mode = eco;
        }
        if let Some(minutes) = self.sleep_after_minutes {
            settings.sleep_after_minutes = (minutes > 0).then_some(minutes);
        }
        if let Some(faults) = self.fault_injection {
            settings.fault_injection = faults;
        }
    }
}

/// Operations a caller can perform on one printer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum PrinterAction {
    /// Queue a document
    SubmitJob(JobRequest),
    /// Cancel a queued or printing job
    CancelJob {
        /// Job to cancel
        job_id: JobId,
    },
    /// Hold the printer; the current job freezes
    Pause,
    /// Release a paused printer
    Resume,
    /// Fill one colour, or every colour when `color` is absent
    RefillInk {
        /// Colour to fill
        #[serde(default)]
        color: Option<InkColor>,
    },
    /// Set a colour to an exact level
    SetInkLevel {
        /// Colour
        color: InkColor,
        /// Level in `[0, 100]`
        level: f64,
    },
    /// Add sheets, or fill the tray when `sheets` is absent
    LoadPaper {
        /// Sheets to add
        #[serde(default)]
        sheets: Option<u32>,
        /// Size to load; a different size replaces the tray contents
        #[serde(default)]
        size: Option<PaperSize>,
    },
    /// Set the tray to an exact count
    SetPaperCount {
        /// Sheets in the tray
        count: u32,
    },
    /// Run a head cleaning cycle
    CleanPrintHeads,
    /// Print an alignment page
    AlignPrintHeads,
    /// Print a nozzle check pattern
    NozzleCheck,
    /// Remove a jammed sheet
    ClearPaperJam,
    /// Turn the printer off and on again
    PowerCycle,
    /// Turn the printer off
    PowerOff,
    /// Turn the printer on
    PowerOn,
    /// Restore consumables, settings and history to factory state
    FactoryReset,
    /// Change printer settings
    UpdateSettings(SettingsPatch),
    /// Change the display name
    Rename {
        /// New name
        name: String,
    },
    /// Record location membership on the snapshot
    Relocate {
        /// New location, if any
        #[serde(default)]
        location_id: Option<LocationId>,
    },
}

impl PrinterAction {
    /// Stable snake_case name, used for logging and metrics labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SubmitJob(_) => "submit_job",
            Self::CancelJob { .. } => "cancel_job",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::RefillInk { .. } => "refill_ink",
            Self::SetInkLevel { .. } => "set_ink_level",
            Self::LoadPaper { .. } => "load_paper",
            Self::SetPaperCount { .. } => "set_paper_count",
            Self::CleanPrintHeads => "clean_print_heads",
            Self::AlignPrintHeads => "align_print_heads",
            Self::NozzleCheck => "nozzle_check",
            Self::ClearPaperJam => "clear_paper_jam",
            Self::PowerCycle => "power_cycle",
            Self::PowerOff => "power_off",
            Self::PowerOn => "power_on",
            Self::FactoryReset => "factory_reset",
            Self::UpdateSettings(_) => "update_settings",
            Self::Rename { .. } => "rename",
            Self::Relocate { .. } => "relocate",
        }
    }
}

/// Condition of one colour on a nozzle check page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NozzleHealth {
    /// Solid pattern
    Good,
    /// Gaps in the pattern; a cleaning helps
    Streaky,
    /// Pale pattern; ink is low
    Faint,
    /// Nothing printed; ink is empty
    Missing,
}

/// What a successful action did.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The job entered the queue
    JobQueued {
        /// New job
        job_id: JobId,
        /// 1-based position counting the job on the printer
        position: usize,
        /// Expected printing time
        estimated_seconds: u32,
    },
    /// The job was cancelled
    JobCancelled {
        /// Cancelled job
        job_id: JobId,
        /// Progress at cancellation
        progress: f64,
    },
    /// The printer changed state
    StatusChanged {
        /// New status
        status: PrinterStatus,
    },
    /// Colours filled to 100%
    InkRefilled {
        /// Colours filled
        colors: Vec<InkColor>,
    },
    /// A colour was set
    InkLevelSet {
        /// Colour
        color: InkColor,
        /// New level
        level: f64,
    },
    /// The tray changed
    PaperLoaded {
        /// Sheets now loaded
        count: u32,
        /// Size loaded
        size: PaperSize,
    },
    /// Heads were cleaned
    HeadsCleaned {
        /// Ink drawn from each colour
        ink_used: f64,
    },
    /// Heads were aligned
    HeadsAligned,
    /// A nozzle pattern was printed
    NozzleCheckPrinted {
        /// Per-colour condition
        pattern: Vec<(InkColor, NozzleHealth)>,
    },
    /// The jam is gone
    PaperJamCleared {
        /// Status afterwards
        status: PrinterStatus,
    },
    /// Settings were changed
    SettingsUpdated {
        /// Settings afterwards
        settings: PrinterSettings,
    },
    /// Name or location changed
    Updated,
}

/// Why an action was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    /// Malformed input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No job with this id on the printer
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// The job already reached a terminal state
    #[error("Job {job_id} is already {status:?}")]
    JobAlreadyFinished {
        /// Job
        job_id: JobId,
        /// Terminal status
        status: JobStatus,
    },

    /// Not allowed in the printer's current state
    #[error("Cannot {operation} while printer is {status}")]
    InvalidState {
        /// Operation attempted
        operation: &'static str,
        /// Current status
        status: PrinterStatus,
    },

    /// The hardware cannot do this
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Queue is at its limit
    #[error("Queue is full ({limit} jobs)")]
    QueueFull {
        /// Configured limit
        limit: usize,
    },

    /// The requested paper is not the one loaded
    #[error("Job needs {requested} paper but {loaded} is loaded")]
    PaperSizeMismatch {
        /// Size the job asked for
        requested: PaperSize,
        /// Size in the tray
        loaded: PaperSize,
    },

    /// Tray would overflow
    #[error("Tray holds {capacity} sheets, requested {requested}")]
    CapacityExceeded {
        /// Sheets asked for
        requested: u32,
        /// Tray capacity
        capacity: u32,
    },

    /// Not enough paper for a test page
    #[error("Needs {needed} sheets, {available} loaded")]
    InsufficientPaper {
        /// Sheets needed
        needed: u32,
        /// Sheets loaded
        available: u32,
    },

    /// Not enough ink for a maintenance cycle
    #[error("Not enough {0} ink")]
    InsufficientInk(InkColor),

    /// Nothing to clear
    #[error("No paper jam to clear")]
    NoPaperJam,
}

/// Applies [`PrinterAction`]s to a [`PrinterInstance`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PrinterReducer;

impl PrinterReducer {
    /// Creates the reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Reducer for PrinterReducer {
    type State = PrinterInstance;
    type Action = PrinterAction;
    type Environment = PrinterEnvironment;
    type Output = ActionOutcome;
    type Error = OperationError;

    fn reduce(
        &self,
        state: &mut PrinterInstance,
        action: PrinterAction,
        env: &PrinterEnvironment,
    ) -> Result<ActionOutcome, OperationError> {
        let now = env.clock.now().max(state.last_updated);
        let config = &env.config;

        match action {
            PrinterAction::SubmitJob(request) => submit_job(state, &request, now, config),
            PrinterAction::CancelJob { job_id } => cancel_job(state, &job_id, now, config),
            PrinterAction::Pause => pause(state, now, config),
            PrinterAction::Resume => resume(state, now, config),
            PrinterAction::RefillInk { color } => refill_ink(state, color, now, config),
            PrinterAction::SetInkLevel { color, level } => {
                set_ink_level(state, color, level, now, config)
            }
            PrinterAction::LoadPaper { sheets, size } => {
                load_paper(state, sheets, size, now, config)
            }
            PrinterAction::SetPaperCount { count } => set_paper_count(state, count, now, config),
            PrinterAction::CleanPrintHeads => clean_print_heads(state, now, config),
            PrinterAction::AlignPrintHeads => align_print_heads(state, now, config),
            PrinterAction::NozzleCheck => nozzle_check(state, now, config),
            PrinterAction::ClearPaperJam => clear_paper_jam(state, now, config),
            PrinterAction::PowerCycle => power_cycle(state, now, config),
            PrinterAction::PowerOff => power_off(state, now, config),
            PrinterAction::PowerOn => power_on(state, now, config),
            PrinterAction::FactoryReset => Ok(factory_reset(state, now, config)),
            PrinterAction::UpdateSettings(patch) => {
                patch.apply(&mut state.settings);
                state.log(LogLevel::Info, now, "Settings updated", config.log_limit);
                Ok(ActionOutcome::SettingsUpdated {
                    settings: state.settings.clone(),
                })
            }
            PrinterAction::Rename { name } => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(OperationError::InvalidRequest("name is empty".to_string()));
                }
                state.name = name.to_string();
                Ok(ActionOutcome::Updated)
            }
            PrinterAction::Relocate { location_id } => {
                state.location_id = location_id;
                Ok(ActionOutcome::Updated)
            }
        }
    }
}

fn submit_job(
    state: &mut PrinterInstance,
    request: &JobRequest,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    if request.document_name.trim().is_empty() {
        return Err(OperationError::InvalidRequest(
            "document name is empty".to_string(),
        ));
    }
    if request.pages == 0 || request.pages > config.max_pages_per_job {
        return Err(OperationError::InvalidRequest(format!(
            "pages must be between 1 and {}",
            config.max_pages_per_job
        )));
    }
    if state.status == PrinterStatus::Offline {
        return Err(OperationError::InvalidState {
            operation: "submit a job",
            status: state.status,
        });
    }
    if request.color && !state.hardware.is_color() {
        return Err(OperationError::Unsupported(format!(
            "{} prints in black only",
            state.hardware.display_name()
        )));
    }
    let quality = request.quality.unwrap_or(state.settings.default_quality);
    if quality == Quality::Photo && !state.hardware.features.photo {
        return Err(OperationError::Unsupported(format!(
            "{} has no photo mode",
            state.hardware.display_name()
        )));
    }
    let paper_size = request.paper_size.unwrap_or(state.paper.size);
    if !state.hardware.supports_size(paper_size) {
        return Err(OperationError::Unsupported(format!(
            "{} does not take {paper_size} paper",
            state.hardware.display_name()
        )));
    }
    if paper_size != state.paper.size {
        return Err(OperationError::PaperSizeMismatch {
            requested: paper_size,
            loaded: state.paper.size,
        });
    }
    if state.pending_jobs() >= config.max_queue_length {
        return Err(OperationError::QueueFull {
            limit: config.max_queue_length,
        });
    }

    let estimated = estimate_seconds(
        request.pages,
        quality,
        state.hardware.ppm(request.color),
        config.speed_multiplier,
    );
    let job = PrintJob::queued(
        JobId::generate(),
        request,
        quality,
        paper_size,
        estimated,
        now,
    );
    let job_id = job.id.clone();

    if state.status == PrinterStatus::Sleep {
        state.set_status(PrinterStatus::WarmingUp, now);
        state.log(LogLevel::Info, now, "Woke from sleep", config.log_limit);
    }
    state.log(
        LogLevel::Info,
        now,
        format!("Queued \"{}\" ({} pages)", job.document_name, job.pages),
        config.log_limit,
    );
    state.queue.push(job);

    Ok(ActionOutcome::JobQueued {
        job_id,
        position: state.pending_jobs(),
        estimated_seconds: estimated,
    })
}

fn cancel_job(
    state: &mut PrinterInstance,
    job_id: &JobId,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    let mut job = if let Some(job) = state.current_job.take_if(|job| &job.id == job_id) {
        if state.status == PrinterStatus::Printing {
            state.set_status(PrinterStatus::Ready, now);
        }
        job
    } else if let Some(index) = state.queue.iter().position(|job| &job.id == job_id) {
        state.queue.remove(index)
    } else if let Some(done) = state.completed_jobs.iter().find(|job| &job.id == job_id) {
        return Err(OperationError::JobAlreadyFinished {
            job_id: job_id.clone(),
            status: done.status,
        });
    } else {
        return Err(OperationError::JobNotFound(job_id.clone()));
    };

    job.cancel(now);
    let progress = job.progress;
    state.stats.jobs_cancelled += 1;
    state.advance_cursor(now);
    state.log(
        LogLevel::Info,
        now,
        format!("Cancelled \"{}\"", job.document_name),
        config.log_limit,
    );
    state.archive(job, config.completed_history_limit);

    Ok(ActionOutcome::JobCancelled {
        job_id: job_id.clone(),
        progress,
    })
}

fn pause(
    state: &mut PrinterInstance,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    if !matches!(state.status, PrinterStatus::Ready | PrinterStatus::Printing) {
        return Err(OperationError::InvalidState {
            operation: "pause",
            status: state.status,
        });
    }
    if let Some(job) = state.current_job.as_mut() {
        job.pause(now);
    }
    state.set_status(PrinterStatus::Paused, now);
    state.log(LogLevel::Info, now, "Paused", config.log_limit);
    Ok(ActionOutcome::StatusChanged {
        status: state.status,
    })
}

fn resume(
    state: &mut PrinterInstance,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    if state.status != PrinterStatus::Paused {
        return Err(OperationError::InvalidState {
            operation: "resume",
            status: state.status,
        });
    }
    let status = match state.current_job.as_mut() {
        Some(job) => {
            job.resume(now);
            PrinterStatus::Printing
        }
        None => PrinterStatus::Ready,
    };
    state.set_status(status, now);
    state.advance_cursor(now);
    state.log(LogLevel::Info, now, "Resumed", config.log_limit);
    Ok(ActionOutcome::StatusChanged { status })
}

fn refill_ink(
    state: &mut PrinterInstance,
    color: Option<InkColor>,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    let colors: Vec<InkColor> = match color {
        Some(color) => {
            ensure_carried(state, color)?;
            vec![color]
        }
        None => state.ink.colors().collect(),
    };

    for color in &colors {
        state.ink.refill(*color);
    }
    state.resolve_errors(|e| {
        e.kind == ErrorKind::InkDepleted && e.color.is_none_or(|c| colors.contains(&c))
    });
    state.recover_if_clear(now);

    let names: Vec<&str> = colors.iter().map(|c| c.as_str()).collect();
    state.log(
        LogLevel::Info,
        now,
        format!("Refilled {}", names.join(", ")),
        config.log_limit,
    );
    Ok(ActionOutcome::InkRefilled { colors })
}

fn set_ink_level(
    state: &mut PrinterInstance,
    color: InkColor,
    level: f64,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    if !level.is_finite() || !(0.0..=100.0).contains(&level) {
        return Err(OperationError::InvalidRequest(
            "ink level must be within [0, 100]".to_string(),
        ));
    }
    ensure_carried(state, color)?;

    state.ink.set(color, level);
    if level > 0.0 {
        state.resolve_errors(|e| e.kind == ErrorKind::InkDepleted && e.color == Some(color));
        state.recover_if_clear(now);
    }
    state.log(
        LogLevel::Info,
        now,
        format!("Set {color} ink to {level:.1}%"),
        config.log_limit,
    );
    Ok(ActionOutcome::InkLevelSet { color, level })
}

fn load_paper(
    state: &mut PrinterInstance,
    sheets: Option<u32>,
    size: Option<PaperSize>,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    let size = size.unwrap_or(state.paper.size);
    if !state.hardware.supports_size(size) {
        return Err(OperationError::Unsupported(format!(
            "{} does not take {size} paper",
            state.hardware.display_name()
        )));
    }
    // A different size replaces whatever is in the tray.
    let existing = if size == state.paper.size {
        state.paper.count
    } else {
        0
    };
    let capacity = state.paper.capacity;
    let count = match sheets {
        Some(0) => {
            return Err(OperationError::InvalidRequest(
                "sheets must be positive".to_string(),
            ));
        }
        Some(sheets) => {
            let total = existing.saturating_add(sheets);
            if total > capacity {
                return Err(OperationError::CapacityExceeded {
                    requested: total,
                    capacity,
                });
            }
            total
        }
        None => capacity,
    };

    state.paper.size = size;
    state.paper.count = count;
    state.resolve_errors(|e| e.kind == ErrorKind::OutOfPaper);
    state.recover_if_clear(now);
    state.log(
        LogLevel::Info,
        now,
        format!("Loaded {size} paper, {count} sheets"),
        config.log_limit,
    );
    Ok(ActionOutcome::PaperLoaded { count, size })
}

fn set_paper_count(
    state: &mut PrinterInstance,
    count: u32,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    if count > state.paper.capacity {
        return Err(OperationError::CapacityExceeded {
            requested: count,
            capacity: state.paper.capacity,
        });
    }
    state.paper.count = count;
    if count > 0 {
        state.resolve_errors(|e| e.kind == ErrorKind::OutOfPaper);
        state.recover_if_clear(now);
    }
    state.log(
        LogLevel::Info,
        now,
        format!("Paper count set to {count}"),
        config.log_limit,
    );
    Ok(ActionOutcome::PaperLoaded {
        count,
        size: state.paper.size,
    })
}

fn clean_print_heads(
    state: &mut PrinterInstance,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    ensure_print_heads(state)?;
    ensure_idle(state, "clean print heads")?;
    if let Some(short) = state
        .ink
        .colors()
        .find(|c| !state.ink.can_draw(*c, CLEANING_INK_DRAW))
    {
        return Err(OperationError::InsufficientInk(short));
    }

    let colors: Vec<InkColor> = state.ink.colors().collect();
    for color in colors {
        let draw = state.ink.draw(color, CLEANING_INK_DRAW);
        state.stats.record_ink(color, draw.drawn);
    }
    state.stats.head_cleanings += 1;
    state.maintenance.pages_since_cleaning = 0;
    state.maintenance.last_cleaning = Some(now);
    wake_for_maintenance(state, now);
    state.log(LogLevel::Info, now, "Print heads cleaned", config.log_limit);
    Ok(ActionOutcome::HeadsCleaned {
        ink_used: CLEANING_INK_DRAW,
    })
}

fn align_print_heads(
    state: &mut PrinterInstance,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    ensure_print_heads(state)?;
    ensure_idle(state, "align print heads")?;
    take_test_sheet(state)?;

    state.stats.alignments += 1;
    state.maintenance.aligned = true;
    state.maintenance.last_alignment = Some(now);
    wake_for_maintenance(state, now);
    state.log(LogLevel::Info, now, "Print heads aligned", config.log_limit);
    Ok(ActionOutcome::HeadsAligned)
}

fn nozzle_check(
    state: &mut PrinterInstance,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    ensure_idle(state, "print a nozzle check")?;
    take_test_sheet(state)?;

    let streaky = state.hardware.ink_system.has_print_heads()
        && state.maintenance.pages_since_cleaning >= STREAK_THRESHOLD_PAGES;
    let pattern: Vec<(InkColor, NozzleHealth)> = state
        .ink
        .iter()
        .map(|(color, _)| {
            let health = if state.ink.is_depleted(color) {
                NozzleHealth::Missing
            } else if state.ink.is_low(color) {
                NozzleHealth::Faint
            } else if streaky {
                NozzleHealth::Streaky
            } else {
                NozzleHealth::Good
            };
            (color, health)
        })
        .collect();

    state.stats.nozzle_checks += 1;
    wake_for_maintenance(state, now);
    state.log(LogLevel::Info, now, "Nozzle check printed", config.log_limit);
    Ok(ActionOutcome::NozzleCheckPrinted { pattern })
}

fn clear_paper_jam(
    state: &mut PrinterInstance,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    if !state.has_error(ErrorKind::PaperJam) {
        return Err(OperationError::NoPaperJam);
    }
    state.resolve_errors(|e| e.kind == ErrorKind::PaperJam);
    state.recover_if_clear(now);
    state.log(LogLevel::Info, now, "Paper jam cleared", config.log_limit);
    Ok(ActionOutcome::PaperJamCleared {
        status: state.status,
    })
}

fn power_cycle(
    state: &mut PrinterInstance,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    if state.status == PrinterStatus::Offline {
        return Err(OperationError::InvalidState {
            operation: "power cycle",
            status: state.status,
        });
    }
    interrupt_current(state, now, config);
    state.resolve_errors(|e| e.kind == ErrorKind::HardwareError);
    state.stats.power_cycles += 1;
    begin_warmup(state, now);
    state.log(LogLevel::Info, now, "Power cycled", config.log_limit);
    Ok(ActionOutcome::StatusChanged {
        status: state.status,
    })
}

fn power_off(
    state: &mut PrinterInstance,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    if state.status == PrinterStatus::Offline {
        return Err(OperationError::InvalidState {
            operation: "power off",
            status: state.status,
        });
    }
    interrupt_current(state, now, config);
    state.set_status(PrinterStatus::Offline, now);
    state.log(LogLevel::Info, now, "Powered off", config.log_limit);
    Ok(ActionOutcome::StatusChanged {
        status: state.status,
    })
}

fn power_on(
    state: &mut PrinterInstance,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> Result<ActionOutcome, OperationError> {
    if state.status != PrinterStatus::Offline {
        return Err(OperationError::InvalidState {
            operation: "power on",
            status: state.status,
        });
    }
    begin_warmup(state, now);
    state.log(LogLevel::Info, now, "Powered on", config.log_limit);
    Ok(ActionOutcome::StatusChanged {
        status: state.status,
    })
}

fn factory_reset(
    state: &mut PrinterInstance,
    now: DateTime<Utc>,
    config: &SimulationConfig,
) -> ActionOutcome {
    let mut fresh = PrinterInstance::provision(
        state.id.clone(),
        state.name.clone(),
        &state.hardware,
        state.location_id.clone(),
        config,
        now,
    );
    fresh.stats = std::mem::take(&mut state.stats);
    fresh.stats.jobs_cancelled += u64::try_from(state.pending_jobs()).unwrap_or(0);
    fresh.created_at = state.created_at;
    fresh.version = state.version;
    fresh.last_updated = state.last_updated;
    fresh.log(LogLevel::Warning, now, "Factory reset", config.log_limit);

    *state = fresh;
    ActionOutcome::StatusChanged {
        status: state.status,
    }
}

fn interrupt_current(state: &mut PrinterInstance, now: DateTime<Utc>, config: &SimulationConfig) {
    if let Some(job) = state.current_job.take() {
        let mut events = Vec::new();
        fail_job(state, job, FailureReason::Interrupted, now, config, &mut events);
    }
}

fn begin_warmup(state: &mut PrinterInstance, now: DateTime<Utc>) {
    state.status = PrinterStatus::WarmingUp;
    state.status_since = now;
    state.advance_cursor(now);
}

fn wake_for_maintenance(state: &mut PrinterInstance, now: DateTime<Utc>) {
    if state.status == PrinterStatus::Sleep {
        state.set_status(PrinterStatus::Ready, now);
        state.advance_cursor(now);
    }
}

fn ensure_carried(state: &PrinterInstance, color: InkColor) -> Result<(), OperationError> {
    if state.ink.carries(color) {
        Ok(())
    } else {
        Err(OperationError::Unsupported(format!(
            "{} has no {color} ink",
            state.hardware.display_name()
        )))
    }
}

fn ensure_print_heads(state: &PrinterInstance) -> Result<(), OperationError> {
    if state.hardware.ink_system.has_print_heads() {
        Ok(())
    } else {
        Err(OperationError::Unsupported(format!(
            "{} uses toner and has no print heads",
            state.hardware.display_name()
        )))
    }
}

fn ensure_idle(state: &PrinterInstance, operation: &'static str) -> Result<(), OperationError> {
    let idle = matches!(
        state.status,
        PrinterStatus::Ready | PrinterStatus::Sleep | PrinterStatus::Error
    ) && state.current_job.is_none();
    if idle {
        Ok(())
    } else {
        Err(OperationError::InvalidState {
            operation,
            status: state.status,
        })
    }
}

fn take_test_sheet(state: &mut PrinterInstance) -> Result<(), OperationError> {
    if state.paper.count == 0 {
        return Err(OperationError::InsufficientPaper {
            needed: 1,
            available: 0,
        });
    }
    state.paper.count -= 1;
    state.stats.sheets_used += 1;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can unwrap
mod tests {
    use super::*;
    use crate::catalog::builtin_type;
    use crate::printer::PrinterError;
    use crate::types::PrinterId;
    use chrono::{Duration, TimeZone};

    struct Frozen(DateTime<Utc>);

    impl Clock for Frozen {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    struct Never;

    impl RandomSource for Never {
        fn next_f64(&self) -> f64 {
            0.999
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn env() -> PrinterEnvironment {
        PrinterEnvironment::new(
            Arc::new(Frozen(t0())),
            Arc::new(Never),
            SimulationConfig::default(),
        )
    }

    fn printer(type_id: &str) -> PrinterInstance {
        let hardware = builtin_type(type_id).unwrap();
        PrinterInstance::seeded(
            PrinterId::new("p1"),
            "Desk",
            &hardware,
            None,
            &SimulationConfig::default(),
            t0(),
        )
    }

    fn reduce(state: &mut PrinterInstance, action: PrinterAction) -> Result<ActionOutcome, OperationError> {
        PrinterReducer::new().reduce(state, action, &env())
    }

    #[test]
    fn submit_queues_job_with_estimate() {
        let mut state = printer("laser-mono");
        let outcome = reduce(&mut state, PrinterAction::SubmitJob(JobRequest::new("report", 16))).unwrap();

        let ActionOutcome::JobQueued {
            position,
            estimated_seconds,
            ..
        } = outcome
        else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(position, 1);
        assert_eq!(estimated_seconds, 30);
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue[0].submitted_at, t0());
    }

    #[test]
    fn rejected_submit_leaves_state_untouched() {
        let mut state = printer("laser-mono");
        let before = state.clone();

        let err = reduce(&mut state, PrinterAction::SubmitJob(JobRequest::new("doc", 1).in_color())).unwrap_err();
        assert!(matches!(err, OperationError::Unsupported(_)));

        let err = reduce(&mut state, PrinterAction::SubmitJob(JobRequest::new(" ", 1))).unwrap_err();
        assert!(matches!(err, OperationError::InvalidRequest(_)));

        let err = reduce(&mut state, PrinterAction::SubmitJob(JobRequest::new("doc", 0))).unwrap_err();
        assert!(matches!(err, OperationError::InvalidRequest(_)));

        assert_eq!(state, before);
    }

    #[test]
    fn submit_rejects_wrong_paper_size() {
        let mut state = printer("laser-mono");
        let mut request = JobRequest::new("doc", 1);
        request.paper_size = Some(PaperSize::Letter);

        let err = reduce(&mut state, PrinterAction::SubmitJob(request)).unwrap_err();
        assert_eq!(
            err,
            OperationError::PaperSizeMismatch {
                requested: PaperSize::Letter,
                loaded: PaperSize::A4,
            }
        );
    }

    #[test]
    fn queue_is_capped() {
        let mut state = printer("laser-mono");
        for _ in 0..SimulationConfig::default().max_queue_length {
            reduce(&mut state, PrinterAction::SubmitJob(JobRequest::new("doc", 1))).unwrap();
        }
        let err = reduce(&mut state, PrinterAction::SubmitJob(JobRequest::new("doc", 1))).unwrap_err();
        assert_eq!(err, OperationError::QueueFull { limit: 32 });
    }

    #[test]
    fn submit_wakes_a_sleeping_printer() {
        let mut state = printer("laser-mono");
        state.set_status(PrinterStatus::Sleep, t0());
        reduce(&mut state, PrinterAction::SubmitJob(JobRequest::new("doc", 1))).unwrap();
        assert_eq!(state.status, PrinterStatus::WarmingUp);
    }

    #[test]
    fn cancel_queued_job_archives_it() {
        let mut state = printer("laser-mono");
        let ActionOutcome::JobQueued { job_id, .. } =
            reduce(&mut state, PrinterAction::SubmitJob(JobRequest::new("doc", 4))).unwrap()
        else {
            panic!("not queued");
        };

        reduce(&mut state, PrinterAction::CancelJob { job_id: job_id.clone() }).unwrap();
        assert!(state.queue.is_empty());
        assert_eq!(state.completed_jobs[0].status, JobStatus::Cancelled);
        assert_eq!(state.stats.jobs_cancelled, 1);

        let err = reduce(&mut state, PrinterAction::CancelJob { job_id }).unwrap_err();
        assert!(matches!(err, OperationError::JobAlreadyFinished { .. }));

        let err = reduce(&mut state, PrinterAction::CancelJob { job_id: JobId::new("nope") }).unwrap_err();
        assert!(matches!(err, OperationError::JobNotFound(_)));
    }

    #[test]
    fn pause_and_resume_toggle_status() {
        let mut state = printer("laser-mono");
        reduce(&mut state, PrinterAction::Pause).unwrap();
        assert_eq!(state.status, PrinterStatus::Paused);

        let err = reduce(&mut state, PrinterAction::Pause).unwrap_err();
        assert!(matches!(err, OperationError::InvalidState { .. }));

        reduce(&mut state, PrinterAction::Resume).unwrap();
        assert_eq!(state.status, PrinterStatus::Ready);
    }

    #[test]
    fn refill_clears_ink_error_and_recovers() {
        let mut state = printer("inkjet-home");
        state.ink.set(InkColor::Cyan, 0.0);
        state.raise(PrinterError {
            kind: ErrorKind::InkDepleted,
            color: Some(InkColor::Cyan),
            job_id: None,
            occurred_at: t0(),
        });
        state.set_status(PrinterStatus::Error, t0());

        reduce(&mut state, PrinterAction::RefillInk { color: Some(InkColor::Cyan) }).unwrap();
        assert_eq!(state.ink.level(InkColor::Cyan), Some(100.0));
        assert!(state.errors.is_empty());
        assert_eq!(state.status, PrinterStatus::Ready);
    }

    #[test]
    fn refill_rejects_colour_not_carried() {
        let mut state = printer("laser-mono");
        let err = reduce(&mut state, PrinterAction::RefillInk { color: Some(InkColor::Yellow) }).unwrap_err();
        assert!(matches!(err, OperationError::Unsupported(_)));
    }

    #[test]
    fn set_ink_level_validates_range() {
        let mut state = printer("inkjet-home");
        let err = reduce(&mut state, PrinterAction::SetInkLevel { color: InkColor::Black, level: 120.0 }).unwrap_err();
        assert!(matches!(err, OperationError::InvalidRequest(_)));

        reduce(&mut state, PrinterAction::SetInkLevel { color: InkColor::Black, level: 12.5 }).unwrap();
        assert_eq!(state.ink.level(InkColor::Black), Some(12.5));
    }

    #[test]
    fn load_paper_respects_capacity() {
        let mut state = printer("inkjet-home");
        let err = reduce(&mut state, PrinterAction::LoadPaper { sheets: Some(50), size: None }).unwrap_err();
        assert_eq!(
            err,
            OperationError::CapacityExceeded {
                requested: 130,
                capacity: 100,
            }
        );

        reduce(&mut state, PrinterAction::LoadPaper { sheets: Some(20), size: None }).unwrap();
        assert_eq!(state.paper.count, 100);
    }

    #[test]
    fn loading_a_new_size_replaces_the_tray() {
        let mut state = printer("inkjet-home");
        let outcome = reduce(
            &mut state,
            PrinterAction::LoadPaper {
                sheets: Some(20),
                size: Some(PaperSize::Photo4x6),
            },
        )
        .unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::PaperLoaded {
                count: 20,
                size: PaperSize::Photo4x6,
            }
        );
    }

    #[test]
    fn set_paper_count_clears_out_of_paper() {
        let mut state = printer("laser-mono");
        state.paper.count = 0;
        state.raise(PrinterError {
            kind: ErrorKind::OutOfPaper,
            color: None,
            job_id: None,
            occurred_at: t0(),
        });
        state.set_status(PrinterStatus::Error, t0());

        reduce(&mut state, PrinterAction::SetPaperCount { count: 50 }).unwrap();
        assert_eq!(state.status, PrinterStatus::Ready);
        assert!(state.errors.is_empty());
    }

    #[test]
    fn toner_printers_have_no_heads_to_clean() {
        let mut state = printer("laser-color");
        let err = reduce(&mut state, PrinterAction::CleanPrintHeads).unwrap_err();
        assert!(matches!(err, OperationError::Unsupported(_)));
    }

    #[test]
    fn cleaning_draws_ink_and_resets_counter() {
        let mut state = printer("inkjet-home");
        state.maintenance.pages_since_cleaning = 2_000;
        reduce(&mut state, PrinterAction::CleanPrintHeads).unwrap();

        assert_eq!(state.maintenance.pages_since_cleaning, 0);
        assert_eq!(state.stats.head_cleanings, 1);
        assert_eq!(state.ink.level(InkColor::Magenta), Some(100.0 - CLEANING_INK_DRAW));
    }

    #[test]
    fn cleaning_needs_ink_in_every_colour() {
        let mut state = printer("inkjet-home");
        state.ink.set(InkColor::Yellow, 1.0);
        let err = reduce(&mut state, PrinterAction::CleanPrintHeads).unwrap_err();
        assert_eq!(err, OperationError::InsufficientInk(InkColor::Yellow));
    }

    #[test]
    fn nozzle_check_reports_each_colour() {
        let mut state = printer("inkjet-home");
        state.ink.set(InkColor::Cyan, 0.0);
        state.ink.set(InkColor::Yellow, 10.0);

        let ActionOutcome::NozzleCheckPrinted { pattern } =
            reduce(&mut state, PrinterAction::NozzleCheck).unwrap()
        else {
            panic!("no pattern");
        };
        assert!(pattern.contains(&(InkColor::Cyan, NozzleHealth::Missing)));
        assert!(pattern.contains(&(InkColor::Yellow, NozzleHealth::Faint)));
        assert!(pattern.contains(&(InkColor::Black, NozzleHealth::Good)));
        assert_eq!(state.paper.count, 79);
    }

    #[test]
    fn test_pages_need_paper() {
        let mut state = printer("inkjet-home");
        state.paper.count = 0;
        let err = reduce(&mut state, PrinterAction::AlignPrintHeads).unwrap_err();
        assert!(matches!(err, OperationError::InsufficientPaper { .. }));
    }

    #[test]
    fn clearing_a_jam_requires_one() {
        let mut state = printer("laser-mono");
        assert_eq!(reduce(&mut state, PrinterAction::ClearPaperJam).unwrap_err(), OperationError::NoPaperJam);

        state.raise(PrinterError {
            kind: ErrorKind::PaperJam,
            color: None,
            job_id: None,
            occurred_at: t0(),
        });
        state.set_status(PrinterStatus::Error, t0());
        let outcome = reduce(&mut state, PrinterAction::ClearPaperJam).unwrap();
        assert_eq!(outcome, ActionOutcome::PaperJamCleared { status: PrinterStatus::Ready });
    }

    #[test]
    fn power_cycle_interrupts_job_and_clears_hardware_error() {
        let mut state = printer("laser-mono");
        let mut job = PrintJob::queued(JobId::new("j1"), &JobRequest::new("doc", 10), Quality::Normal, PaperSize::A4, 20, t0());
        job.start(t0());
        state.current_job = Some(job);
        state.raise(PrinterError {
            kind: ErrorKind::HardwareError,
            color: None,
            job_id: None,
            occurred_at: t0(),
        });
        state.set_status(PrinterStatus::Error, t0());

        reduce(&mut state, PrinterAction::PowerCycle).unwrap();
        assert_eq!(state.status, PrinterStatus::WarmingUp);
        assert!(state.errors.is_empty());
        assert!(state.current_job.is_none());
        assert_eq!(state.completed_jobs[0].failure, Some(FailureReason::Interrupted));
        assert_eq!(state.stats.power_cycles, 1);
    }

    #[test]
    fn power_off_then_on() {
        let mut state = printer("laser-mono");
        reduce(&mut state, PrinterAction::PowerOff).unwrap();
        assert_eq!(state.status, PrinterStatus::Offline);
        assert!(matches!(
            reduce(&mut state, PrinterAction::SubmitJob(JobRequest::new("doc", 1))),
            Err(OperationError::InvalidState { .. })
        ));

        reduce(&mut state, PrinterAction::PowerOn).unwrap();
        assert_eq!(state.status, PrinterStatus::WarmingUp);
    }

    #[test]
    fn factory_reset_restores_consumables_and_keeps_counters() {
        let mut state = printer("inkjet-home");
        state.ink.set(InkColor::Black, 3.0);
        state.paper.count = 2;
        state.stats.pages_printed = 500;
        state.settings.eco_mode = true;

        reduce(&mut state, PrinterAction::FactoryReset).unwrap();
        assert_eq!(state.ink.level(InkColor::Black), Some(100.0));
        assert_eq!(state.paper.count, 80);
        assert_eq!(state.stats.pages_printed, 500);
        assert!(!state.settings.eco_mode);
        assert_eq!(state.status, PrinterStatus::WarmingUp);
    }

    #[test]
    fn settings_patch_only_touches_given_fields() {
        let mut state = printer("inkjet-home");
        let patch = SettingsPatch {
            eco_mode: Some(true),
            sleep_after_minutes: Some(10),
            ..SettingsPatch::default()
        };
        reduce(&mut state, PrinterAction::UpdateSettings(patch)).unwrap();
        assert!(state.settings.eco_mode);
        assert_eq!(state.settings.sleep_after_minutes, Some(10));
        assert!(state.settings.fault_injection);

        let disable = SettingsPatch {
            sleep_after_minutes: Some(0),
            ..SettingsPatch::default()
        };
        reduce(&mut state, PrinterAction::UpdateSettings(disable)).unwrap();
        assert_eq!(state.settings.sleep_after_minutes, None);
    }

    #[test]
    fn actions_are_tagged_by_operation() {
        let action: PrinterAction = serde_json::from_str(
            r#"{"operation": "submit_job", "document_name": "a.pdf", "pages": 2, "color": true}"#,
        )
        .unwrap();
        assert_eq!(action.name(), "submit_job");

        let action: PrinterAction =
            serde_json::from_str(r#"{"operation": "refill_ink"}"#).unwrap();
        assert_eq!(action, PrinterAction::RefillInk { color: None });
    }

    #[test]
    fn clock_behind_snapshot_uses_last_update() {
        let mut state = printer("laser-mono");
        state.last_updated = t0() + Duration::minutes(5);
        reduce(&mut state, PrinterAction::SubmitJob(JobRequest::new("doc", 1))).unwrap();
        assert_eq!(state.queue[0].submitted_at, t0() + Duration::minutes(5));
    }
}
