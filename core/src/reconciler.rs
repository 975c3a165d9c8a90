//! State reconciler: brings a snapshot up to date with wall-clock time.
//!
//! Nothing in the simulation runs in the background. Instead, every
//! invocation calls [`reconcile`] with the current time and the reconciler
//! replays everything that should have happened since the snapshot was last
//! observed:
//!
//! 1. A printer that finished warming up becomes `ready`.
//! 2. The current job charges ink and paper for each page boundary crossed,
//!    then completes or fails. The next queued job starts at the instant the
//!    previous one ended, so one call can catch up through several jobs.
//! 3. Each job start rolls the injected [`RandomSource`] against the
//!    configured fault probability.
//! 4. An idle printer with auto-sleep enabled falls asleep.
//!
//! All arithmetic is derived from absolute timestamps stored on the
//! snapshot, never from deltas between calls:
//!
//! ```text
//! reconcile(reconcile(s, t), t) == reconcile(s, t)
//! ```

use crate::config::SimulationConfig;
use crate::environment::RandomSource;
use crate::job::{FailureReason, PrintJob};
use crate::printer::{ErrorKind, LogLevel, PrinterError, PrinterInstance, PrinterStatus};
use crate::resource::{self, Depletion};
use crate::types::{JobId, PrinterId};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

/// Reconciliation failed because the snapshot itself is unusable.
///
/// Depletion, jams and faults are never errors; they are recorded on the
/// snapshot as data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// A structural invariant does not hold.
    #[error("Invalid snapshot for printer {printer_id}: {reason}")]
    InvalidSnapshot {
        /// Printer whose snapshot is invalid
        printer_id: PrinterId,
        /// First violated invariant
        reason: String,
    },
}

/// A transition applied during reconciliation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    /// Warm-up finished
    WarmedUp {
        /// When
        at: DateTime<Utc>,
    },
    /// Idle timeout expired
    FellAsleep {
        /// When
        at: DateTime<Utc>,
    },
    /// A queued job went onto the printer
    JobStarted {
        /// Job
        job_id: JobId,
        /// When
        at: DateTime<Utc>,
    },
    /// A job finished all its pages
    JobCompleted {
        /// Job
        job_id: JobId,
        /// When
        at: DateTime<Utc>,
    },
    /// A job stopped early
    JobFailed {
        /// Job
        job_id: JobId,
        /// Why
        reason: FailureReason,
        /// When
        at: DateTime<Utc>,
    },
    /// Fault injection hit on a job start
    ErrorInjected {
        /// Which fault
        kind: ErrorKind,
        /// When
        at: DateTime<Utc>,
    },
    /// The per-call job bound stopped the catch-up loop
    CatchUpLimitReached {
        /// Jobs still queued
        remaining: usize,
    },
}

/// Result of one reconciliation.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconciliation {
    /// The up-to-date snapshot
    pub snapshot: PrinterInstance,
    /// Transitions applied, in order
    pub events: Vec<SimEvent>,
}

impl Reconciliation {
    /// Whether any discrete transition happened.
    ///
    /// Progress and page charges alone do not count; they are recomputed
    /// identically from the stored snapshot on the next call.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.events.is_empty()
    }
}

enum Advance {
    Running,
    Finished,
}

/// Brings `snapshot` up to date as of `now`.
///
/// Pure: the input is not modified and no I/O happens. A `now` earlier
/// than the snapshot's `last_updated` is treated as `last_updated`.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidSnapshot`] when the snapshot violates a
/// structural invariant. Callers decide whether to reseed.
pub fn reconcile(
    snapshot: &PrinterInstance,
    now: DateTime<Utc>,
    random: &dyn RandomSource,
    config: &SimulationConfig,
) -> Result<Reconciliation, ReconcileError> {
    snapshot.validate()?;

    let mut printer = snapshot.clone();
    let now = now.max(printer.last_updated);
    let mut events = Vec::new();

    printer.ink.normalize();
    printer.paper.count = printer.paper.count.min(printer.paper.capacity);

    finish_warmup(&mut printer, now, config, &mut events);
    run_queue(&mut printer, now, random, config, &mut events);
    fall_asleep(&mut printer, now, config, &mut events);

    printer.last_updated = now;
    Ok(Reconciliation {
        snapshot: printer,
        events,
    })
}

fn finish_warmup(
    printer: &mut PrinterInstance,
    now: DateTime<Utc>,
    config: &SimulationConfig,
    events: &mut Vec<SimEvent>,
) {
    if printer.status != PrinterStatus::WarmingUp {
        return;
    }
    let ready_at = printer.status_since + Duration::seconds(i64::from(config.warmup_seconds));
    if now < ready_at {
        return;
    }

    if printer.errors.is_empty() {
        printer.set_status(PrinterStatus::Ready, ready_at);
        printer.advance_cursor(ready_at);
        printer.log(LogLevel::Info, ready_at, "Warm-up complete, ready", config.log_limit);
    } else {
        printer.set_status(PrinterStatus::Error, ready_at);
        printer.log(
            LogLevel::Warning,
            ready_at,
            "Warm-up complete with unresolved errors",
            config.log_limit,
        );
    }
    events.push(SimEvent::WarmedUp { at: ready_at });
}

fn run_queue(
    printer: &mut PrinterInstance,
    now: DateTime<Utc>,
    random: &dyn RandomSource,
    config: &SimulationConfig,
    events: &mut Vec<SimEvent>,
) {
    let mut started = 0usize;

    loop {
        if printer.current_job.is_some() {
            if let Advance::Running = advance_current(printer, now, config, events) {
                break;
            }
        }

        if !printer.status.accepts_work() || printer.queue.is_empty() {
            break;
        }
        if started >= config.max_jobs_per_reconcile {
            events.push(SimEvent::CatchUpLimitReached {
                remaining: printer.queue.len(),
            });
            break;
        }
        let start_at = printer.queue_cursor.max(printer.queue[0].submitted_at);
        if start_at > now {
            break;
        }

        let mut job = printer.queue.remove(0);
        job.start(start_at);
        started += 1;
        printer.set_status(PrinterStatus::Printing, start_at);
        events.push(SimEvent::JobStarted {
            job_id: job.id.clone(),
            at: start_at,
        });
        printer.log(
            LogLevel::Info,
            start_at,
            format!("Started \"{}\" ({} pages)", job.document_name, job.pages),
            config.log_limit,
        );

        if let Some(kind) = roll_fault(printer, random, config) {
            let reason = match kind {
                ErrorKind::PaperJam => {
                    printer.stats.paper_jams += 1;
                    FailureReason::PaperJam
                }
                _ => FailureReason::HardwareError,
            };
            printer.raise(PrinterError {
                kind,
                color: None,
                job_id: Some(job.id.clone()),
                occurred_at: start_at,
            });
            events.push(SimEvent::ErrorInjected { kind, at: start_at });
            fail_job(printer, job, reason, start_at, config, events);
            printer.set_status(PrinterStatus::Error, start_at);
            break;
        }

        printer.current_job = Some(job);
    }

    if printer.current_job.is_none() && printer.status == PrinterStatus::Printing {
        let idle_at = printer.queue_cursor;
        printer.set_status(PrinterStatus::Ready, idle_at);
    }
}

fn advance_current(
    printer: &mut PrinterInstance,
    now: DateTime<Utc>,
    config: &SimulationConfig,
    events: &mut Vec<SimEvent>,
) -> Advance {
    let Some(mut job) = printer.current_job.take() else {
        return Advance::Finished;
    };

    // Paper and ink are checked when a page is fed and charged when it
    // finishes.
    let due = job.pages_due_at(now);
    let fed = job.pages_started_at(now);
    while job.pages_printed < fed {
        let delta = resource::consume(&job, printer);
        if job.pages_printed >= due && resource::shortfall(printer, &delta).is_none() {
            break;
        }
        match resource::apply_delta(printer, &delta) {
            Ok(()) => {
                job.pages_printed += 1;
                printer.stats.pages_printed += 1;
                printer.maintenance.pages_since_cleaning += 1;
            }
            Err(depletion) => {
                // Never before the last observation, e.g. a tray emptied
                // mid-page.
                let at = job.page_instant(job.pages_printed).max(printer.last_updated);
                let (reason, error) = match depletion {
                    Depletion::OutOfPaper => (
                        FailureReason::OutOfPaper,
                        PrinterError {
                            kind: ErrorKind::OutOfPaper,
                            color: None,
                            job_id: Some(job.id.clone()),
                            occurred_at: at,
                        },
                    ),
                    Depletion::InkDepleted(color) => (
                        FailureReason::InkDepleted,
                        PrinterError {
                            kind: ErrorKind::InkDepleted,
                            color: Some(color),
                            job_id: Some(job.id.clone()),
                            occurred_at: at,
                        },
                    ),
                };
                printer.raise(error);
                fail_job(printer, job, reason, at, config, events);
                printer.set_status(PrinterStatus::Error, at);
                return Advance::Finished;
            }
        }
    }

    if job.is_finished_at(now) {
        let at = job.finish_instant();
        job.complete(at);
        printer.stats.jobs_completed += 1;
        printer.advance_cursor(at);
        events.push(SimEvent::JobCompleted {
            job_id: job.id.clone(),
            at,
        });
        printer.log(
            LogLevel::Info,
            at,
            format!("Completed \"{}\"", job.document_name),
            config.log_limit,
        );
        printer.archive(job, config.completed_history_limit);
        Advance::Finished
    } else {
        job.progress = job.progress_at(now);
        printer.current_job = Some(job);
        Advance::Running
    }
}

/// Fails `job` at `at`, archives it and advances the queue cursor.
pub(crate) fn fail_job(
    printer: &mut PrinterInstance,
    mut job: PrintJob,
    reason: FailureReason,
    at: DateTime<Utc>,
    config: &SimulationConfig,
    events: &mut Vec<SimEvent>,
) {
    job.fail(reason, at);
    printer.stats.jobs_failed += 1;
    printer.advance_cursor(at);
    events.push(SimEvent::JobFailed {
        job_id: job.id.clone(),
        reason,
        at,
    });
    printer.log(
        LogLevel::Error,
        at,
        format!("Job \"{}\" failed: {reason}", job.document_name),
        config.log_limit,
    );
    printer.archive(job, config.completed_history_limit);
}

fn roll_fault(
    printer: &PrinterInstance,
    random: &dyn RandomSource,
    config: &SimulationConfig,
) -> Option<ErrorKind> {
    if !printer.settings.fault_injection || config.error_probability <= 0.0 {
        return None;
    }
    if random.next_f64() >= config.error_probability {
        return None;
    }
    if random.next_f64() < config.paper_jam_share {
        Some(ErrorKind::PaperJam)
    } else {
        Some(ErrorKind::HardwareError)
    }
}

fn fall_asleep(
    printer: &mut PrinterInstance,
    now: DateTime<Utc>,
    config: &SimulationConfig,
    events: &mut Vec<SimEvent>,
) {
    if printer.status != PrinterStatus::Ready
        || printer.current_job.is_some()
        || !printer.queue.is_empty()
    {
        return;
    }
    let Some(minutes) = printer.settings.sleep_after_minutes.filter(|m| *m > 0) else {
        return;
    };

    let idle_since = printer.status_since.max(printer.queue_cursor);
    let asleep_at = idle_since + Duration::minutes(i64::from(minutes));
    if now >= asleep_at {
        printer.set_status(PrinterStatus::Sleep, asleep_at);
        printer.log(LogLevel::Info, asleep_at, "Entered sleep mode", config.log_limit);
        events.push(SimEvent::FellAsleep { at: asleep_at });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can unwrap
mod tests {
    use super::*;
    use crate::catalog::{PaperSize, builtin_type};
    use crate::ink::InkColor;
    use crate::job::{JobRequest, JobStatus, Quality, estimate_seconds};
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct Fixed(f64);

    impl RandomSource for Fixed {
        fn next_f64(&self) -> f64 {
            self.0
        }
    }

    struct Sequence(Mutex<Vec<f64>>);

    impl RandomSource for Sequence {
        fn next_f64(&self) -> f64 {
            let mut values = self.0.lock().unwrap();
            if values.is_empty() { 0.99 } else { values.remove(0) }
        }
    }

    const NEVER: Fixed = Fixed(0.999);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    fn config() -> SimulationConfig {
        SimulationConfig::default()
    }

    fn printer(type_id: &str) -> PrinterInstance {
        let hardware = builtin_type(type_id).unwrap();
        PrinterInstance::seeded(PrinterId::new("p1"), "P1", &hardware, None, &config(), t0())
    }

    fn enqueue(printer: &mut PrinterInstance, id: &str, request: &JobRequest, at: DateTime<Utc>) {
        let quality = request.quality.unwrap_or_default();
        let seconds = estimate_seconds(
            request.pages,
            quality,
            printer.hardware.ppm(request.color),
            1.0,
        );
        printer.queue.push(PrintJob::queued(
            JobId::new(id),
            request,
            quality,
            PaperSize::A4,
            seconds,
            at,
        ));
    }

    #[test]
    fn warming_up_becomes_ready_after_warmup() {
        let mut p = printer("laser-mono");
        p.status = PrinterStatus::WarmingUp;

        let early = reconcile(&p, t0() + Duration::seconds(5), &NEVER, &config()).unwrap();
        assert_eq!(early.snapshot.status, PrinterStatus::WarmingUp);

        let later = reconcile(&p, t0() + Duration::seconds(30), &NEVER, &config()).unwrap();
        assert_eq!(later.snapshot.status, PrinterStatus::Ready);
        assert_eq!(later.snapshot.status_since, t0() + Duration::seconds(10));
        assert_eq!(later.events, vec![SimEvent::WarmedUp { at: t0() + Duration::seconds(10) }]);
    }

    #[test]
    fn job_completes_exactly_at_its_estimate() {
        let mut p = printer("laser-mono");
        // 16 pages at 32 ppm = 30 seconds
        enqueue(&mut p, "j1", &JobRequest::new("doc", 16), t0());

        let before = reconcile(&p, t0() + Duration::milliseconds(29_999), &NEVER, &config()).unwrap();
        let job = before.snapshot.current_job.as_ref().unwrap();
        assert_eq!(job.status, JobStatus::Printing);
        assert_eq!(job.pages_printed, 15);

        let after = reconcile(&p, t0() + Duration::seconds(30), &NEVER, &config()).unwrap();
        assert!(after.snapshot.current_job.is_none());
        let done = after.snapshot.completed_jobs.last().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.completed_at, Some(t0() + Duration::seconds(30)));
        assert_eq!(after.snapshot.status, PrinterStatus::Ready);
        assert_eq!(after.snapshot.stats.pages_printed, 16);
        assert_eq!(after.snapshot.stats.jobs_completed, 1);
        assert_eq!(after.snapshot.paper.count, 200 - 16);
    }

    #[test]
    fn stale_snapshot_catches_up_through_several_jobs() {
        let mut p = printer("laser-mono");
        for i in 0..3 {
            enqueue(&mut p, &format!("j{i}"), &JobRequest::new("doc", 16), t0());
        }

        let result = reconcile(&p, t0() + Duration::seconds(75), &NEVER, &config()).unwrap();
        let s = &result.snapshot;
        assert_eq!(s.completed_jobs.len(), 2);
        assert_eq!(s.completed_jobs[1].completed_at, Some(t0() + Duration::seconds(60)));
        let current = s.current_job.as_ref().unwrap();
        assert_eq!(current.started_at, Some(t0() + Duration::seconds(60)));
        assert!((current.progress - 50.0).abs() < 1e-9);
        assert_eq!(s.status, PrinterStatus::Printing);
    }

    #[test]
    fn out_of_paper_stops_at_the_exact_page() {
        let mut p = printer("laser-mono");
        p.paper.count = 5;
        enqueue(&mut p, "j1", &JobRequest::new("doc", 10), t0());

        let result = reconcile(&p, t0() + Duration::hours(1), &NEVER, &config()).unwrap();
        let s = &result.snapshot;
        let job = s.completed_jobs.last().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failure, Some(FailureReason::OutOfPaper));
        assert_eq!(job.pages_printed, 5);
        assert!((job.progress - 50.0).abs() < 1e-9);
        assert_eq!(job.completed_at, Some(job.page_instant(5)));
        assert_eq!(s.paper.count, 0);
        assert_eq!(s.stats.jobs_failed, 1);
        assert_eq!(s.status, PrinterStatus::Error);
        assert!(s.has_error(ErrorKind::OutOfPaper));
    }

    #[test]
    fn empty_tray_fails_the_job_when_the_next_page_is_fed() {
        let mut p = printer("laser-mono");
        p.paper.count = 5;
        enqueue(&mut p, "j1", &JobRequest::new("doc", 10), t0());
        let estimated = p.queue[0].estimated_ms();

        // Between the fifth page finishing and the sixth one finishing.
        let now = t0() + Duration::milliseconds(estimated * 55 / 100);
        let result = reconcile(&p, now, &NEVER, &config()).unwrap();
        let s = &result.snapshot;
        assert!(s.current_job.is_none());
        assert_eq!(s.status, PrinterStatus::Error);
        let job = s.completed_jobs.last().unwrap();
        assert_eq!(job.failure, Some(FailureReason::OutOfPaper));
        assert!((job.progress - 50.0).abs() < 1e-9);
        assert_eq!(job.completed_at, Some(t0() + Duration::milliseconds(estimated / 2)));
    }

    #[test]
    fn empty_tray_fails_a_job_as_it_starts() {
        let mut p = printer("laser-mono");
        p.paper.count = 0;
        enqueue(&mut p, "j1", &JobRequest::new("doc", 4), t0());

        let result = reconcile(&p, t0(), &NEVER, &config()).unwrap();
        let job = result.snapshot.completed_jobs.last().unwrap();
        assert_eq!(job.failure, Some(FailureReason::OutOfPaper));
        assert_eq!(job.pages_printed, 0);
        assert_eq!(job.completed_at, Some(t0()));
    }

    #[test]
    fn low_cyan_fails_colour_job_and_floors_at_zero() {
        let mut p = printer("inkjet-home");
        p.ink.set(InkColor::Cyan, 2.0);
        enqueue(&mut p, "j1", &JobRequest::new("photo", 20).in_color(), t0());

        let result = reconcile(&p, t0() + Duration::hours(1), &NEVER, &config()).unwrap();
        let s = &result.snapshot;
        let job = s.completed_jobs.last().unwrap();
        assert_eq!(job.failure, Some(FailureReason::InkDepleted));
        assert_eq!(s.ink.level(InkColor::Cyan), Some(0.0));
        assert!(s.errors.iter().any(|e| e.color == Some(InkColor::Cyan)));
    }

    #[test]
    fn forced_fault_fails_job_on_start() {
        let mut p = printer("laser-mono");
        enqueue(&mut p, "j1", &JobRequest::new("doc", 4), t0());
        enqueue(&mut p, "j2", &JobRequest::new("doc", 4), t0());
        let jam = Sequence(Mutex::new(vec![0.0, 0.0]));

        let result = reconcile(&p, t0() + Duration::seconds(1), &jam, &config()).unwrap();
        let s = &result.snapshot;
        assert_eq!(s.status, PrinterStatus::Error);
        assert!(s.has_error(ErrorKind::PaperJam));
        assert_eq!(s.completed_jobs[0].failure, Some(FailureReason::PaperJam));
        assert_eq!(s.queue.len(), 1);
        assert!(s.current_job.is_none());
        assert_eq!(s.stats.paper_jams, 1);
    }

    #[test]
    fn second_roll_selects_hardware_error() {
        let mut p = printer("laser-mono");
        enqueue(&mut p, "j1", &JobRequest::new("doc", 4), t0());
        let fault = Sequence(Mutex::new(vec![0.0, 0.95]));

        let result = reconcile(&p, t0() + Duration::seconds(1), &fault, &config()).unwrap();
        assert!(result.snapshot.has_error(ErrorKind::HardwareError));
    }

    #[test]
    fn disabled_fault_injection_never_rolls() {
        let mut p = printer("laser-mono");
        p.settings.fault_injection = false;
        enqueue(&mut p, "j1", &JobRequest::new("doc", 4), t0());

        let result = reconcile(&p, t0() + Duration::seconds(1), &Fixed(0.0), &config()).unwrap();
        assert!(result.snapshot.errors.is_empty());
        assert!(result.snapshot.current_job.is_some());
    }

    #[test]
    fn reconciling_twice_changes_nothing() {
        let mut p = printer("inkjet-home");
        for i in 0..4 {
            enqueue(&mut p, &format!("j{i}"), &JobRequest::new("doc", 7).in_color(), t0());
        }
        let t = t0() + Duration::seconds(100);

        let once = reconcile(&p, t, &NEVER, &config()).unwrap();
        let twice = reconcile(&once.snapshot, t, &NEVER, &config()).unwrap();
        assert_eq!(once.snapshot, twice.snapshot);
        assert!(!twice.changed());
    }

    #[test]
    fn pause_freezes_the_current_job() {
        let mut p = printer("laser-mono");
        enqueue(&mut p, "j1", &JobRequest::new("doc", 16), t0());
        let running = reconcile(&p, t0() + Duration::seconds(10), &NEVER, &config()).unwrap();

        let mut paused = running.snapshot;
        paused.set_status(PrinterStatus::Paused, t0() + Duration::seconds(10));
        paused.current_job.as_mut().unwrap().pause(t0() + Duration::seconds(10));

        let much_later = reconcile(&paused, t0() + Duration::hours(2), &NEVER, &config()).unwrap();
        let job = much_later.snapshot.current_job.as_ref().unwrap();
        assert_eq!(job.status, JobStatus::Printing);
        assert!((job.progress - 100.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn idle_printer_falls_asleep_at_timeout() {
        let mut p = printer("laser-mono");
        p.settings.sleep_after_minutes = Some(15);

        let awake = reconcile(&p, t0() + Duration::minutes(14), &NEVER, &config()).unwrap();
        assert_eq!(awake.snapshot.status, PrinterStatus::Ready);

        let asleep = reconcile(&p, t0() + Duration::minutes(40), &NEVER, &config()).unwrap();
        assert_eq!(asleep.snapshot.status, PrinterStatus::Sleep);
        assert_eq!(asleep.snapshot.status_since, t0() + Duration::minutes(15));
    }

    #[test]
    fn catch_up_is_bounded_per_call() {
        let config = SimulationConfig {
            max_jobs_per_reconcile: 2,
            max_queue_length: 1,
            ..SimulationConfig::default()
        };
        let mut p = printer("laser-mono");
        for i in 0..5 {
            enqueue(&mut p, &format!("j{i}"), &JobRequest::new("doc", 1).with_quality(Quality::Draft), t0());
        }

        let result = reconcile(&p, t0() + Duration::hours(1), &NEVER, &config).unwrap();
        assert_eq!(result.snapshot.completed_jobs.len(), 2);
        assert_eq!(result.snapshot.queue.len(), 3);
        assert!(result
            .events
            .contains(&SimEvent::CatchUpLimitReached { remaining: 3 }));
    }

    #[test]
    fn invalid_snapshot_fails_loudly() {
        let mut p = printer("laser-mono");
        enqueue(&mut p, "j1", &JobRequest::new("doc", 1), t0());
        p.queue[0].pages = 0;

        let err = reconcile(&p, t0(), &NEVER, &config()).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidSnapshot { .. }));
    }

    #[test]
    fn error_state_halts_the_queue() {
        let mut p = printer("laser-mono");
        p.set_status(PrinterStatus::Error, t0());
        enqueue(&mut p, "j1", &JobRequest::new("doc", 1), t0());

        let result = reconcile(&p, t0() + Duration::hours(1), &NEVER, &config()).unwrap();
        assert_eq!(result.snapshot.queue.len(), 1);
        assert!(result.events.is_empty());
    }
}
