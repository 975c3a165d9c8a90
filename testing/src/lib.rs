//! # Printsim Testing
//!
//! Testing utilities for the printer simulator.
//!
//! This crate provides:
//! - Deterministic implementations of the Environment traits (clocks, randomness)
//! - An in-memory [`SnapshotStore`](printsim_core::storage::SnapshotStore)
//! - Printer and fleet fixtures
//! - `proptest` strategies for simulation inputs
//! - A Given-When-Then [`ReducerTest`]
//!
//! ## Example
//!
//! ```
//! use printsim_testing::{fixtures, test_clock, NeverRandom};
//! use printsim_core::config::SimulationConfig;
//! use printsim_core::environment::Clock;
//! use printsim_core::reconciler::reconcile;
//!
//! let printer = fixtures::printer("laser-mono");
//! let result = reconcile(&printer, test_clock().now(), &NeverRandom, &SimulationConfig::default());
//! assert!(result.is_ok());
//! ```

use chrono::{DateTime, Utc};
use printsim_core::environment::{Clock, RandomSource};

pub mod memory_store;

pub use memory_store::InMemorySnapshotStore;
pub use reducer_test::ReducerTest;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use printsim_testing::mocks::FixedClock;
    /// use printsim_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Lets a test submit a job, jump ahead in time and observe what the
    /// reconciler made of the gap.
    ///
    /// # Example
    ///
    /// ```
    /// use printsim_testing::mocks::ManualClock;
    /// use printsim_testing::test_time;
    /// use printsim_core::environment::Clock;
    /// use chrono::Duration;
    ///
    /// let clock = ManualClock::new(test_time());
    /// clock.advance(Duration::seconds(30));
    /// assert_eq!(clock.now(), test_time() + Duration::seconds(30));
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock stopped at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(super::test_time())
    }
}

/// Deterministic [`RandomSource`] implementations.
pub mod random {
    use super::RandomSource;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Never triggers a fault: every sample is just below 1.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NeverRandom;

    impl RandomSource for NeverRandom {
        fn next_f64(&self) -> f64 {
            0.999_999
        }
    }

    /// Always triggers a fault, and always picks a paper jam.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRandom;

    impl RandomSource for AlwaysRandom {
        fn next_f64(&self) -> f64 {
            0.0
        }
    }

    /// Plays back a fixed sequence of samples, then a fallback forever.
    ///
    /// # Example
    ///
    /// ```
    /// use printsim_testing::random::ScriptedRandom;
    /// use printsim_core::environment::RandomSource;
    ///
    /// // One hardware error, then never again.
    /// let random = ScriptedRandom::new([0.0, 0.9]);
    /// assert_eq!(random.next_f64(), 0.0);
    /// assert_eq!(random.next_f64(), 0.9);
    /// assert!(random.next_f64() > 0.99);
    /// ```
    #[derive(Debug)]
    pub struct ScriptedRandom {
        samples: Mutex<VecDeque<f64>>,
        fallback: f64,
    }

    impl ScriptedRandom {
        /// Script that falls back to "no fault" once exhausted
        #[must_use]
        pub fn new(samples: impl IntoIterator<Item = f64>) -> Self {
            Self::with_fallback(samples, 0.999_999)
        }

        /// Script with an explicit fallback sample
        #[must_use]
        pub fn with_fallback(samples: impl IntoIterator<Item = f64>, fallback: f64) -> Self {
            Self {
                samples: Mutex::new(samples.into_iter().collect()),
                fallback,
            }
        }

        /// Samples not yet consumed
        #[must_use]
        pub fn remaining(&self) -> usize {
            self.samples
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .len()
        }
    }

    impl RandomSource for ScriptedRandom {
        fn next_f64(&self) -> f64 {
            self.samples
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front()
                .unwrap_or(self.fallback)
        }
    }
}

/// Printer and fleet fixtures.
pub mod fixtures {
    use super::{DateTime, Utc, test_time};
    use crate::mocks::FixedClock;
    use crate::random::NeverRandom;
    use printsim_core::catalog::builtin_type;
    use printsim_core::config::SimulationConfig;
    use printsim_core::job::{JobRequest, PrintJob, estimate_seconds};
    use printsim_core::operations::PrinterEnvironment;
    use printsim_core::printer::PrinterInstance;
    use printsim_core::seed::{SeedData, default_fleet};
    use printsim_core::types::{JobId, PrinterId};
    use std::sync::Arc;

    /// A ready printer of a built-in type, created at [`test_time`].
    ///
    /// # Panics
    ///
    /// Panics if `type_id` is not a built-in type.
    #[must_use]
    #[allow(clippy::panic)]
    pub fn printer(type_id: &str) -> PrinterInstance {
        let Some(hardware) = builtin_type(type_id) else {
            panic!("unknown built-in printer type {type_id}");
        };
        PrinterInstance::seeded(
            PrinterId::new(format!("test-{type_id}")),
            format!("Test {type_id}"),
            &hardware,
            None,
            &SimulationConfig::default(),
            test_time(),
        )
    }

    /// Appends a queued job, bypassing validation.
    pub fn enqueue(printer: &mut PrinterInstance, request: &JobRequest, submitted_at: DateTime<Utc>) -> JobId {
        let quality = request.quality.unwrap_or(printer.settings.default_quality);
        let seconds = estimate_seconds(
            request.pages,
            quality,
            printer.hardware.ppm(request.color),
            1.0,
        );
        let id = JobId::new(format!("job-{}", printer.queue.len() + printer.completed_jobs.len() + 1));
        printer.queue.push(PrintJob::queued(
            id.clone(),
            request,
            quality,
            request.paper_size.unwrap_or(printer.paper.size),
            seconds,
            submitted_at,
        ));
        id
    }

    /// The default seed fleet at [`test_time`].
    #[must_use]
    pub fn seed() -> SeedData {
        default_fleet(&SimulationConfig::default(), test_time())
    }

    /// Reducer environment with a fixed clock and no faults.
    #[must_use]
    pub fn environment_at(now: DateTime<Utc>) -> PrinterEnvironment {
        PrinterEnvironment::new(
            Arc::new(FixedClock::new(now)),
            Arc::new(NeverRandom),
            SimulationConfig::default(),
        )
    }

    /// Reducer environment at [`test_time`].
    #[must_use]
    pub fn test_environment() -> PrinterEnvironment {
        environment_at(test_time())
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use printsim_core::ink::InkColor;
    use printsim_core::job::{JobRequest, Quality};
    use proptest::prelude::*;

    /// Any quality tier.
    pub fn quality() -> impl Strategy<Value = Quality> {
        prop_oneof![
            Just(Quality::Draft),
            Just(Quality::Normal),
            Just(Quality::High),
            Just(Quality::Photo),
        ]
    }

    /// Any ink colour.
    pub fn ink_color() -> impl Strategy<Value = InkColor> {
        prop_oneof![
            Just(InkColor::Black),
            Just(InkColor::Cyan),
            Just(InkColor::Magenta),
            Just(InkColor::Yellow),
        ]
    }

    /// A mono or colour request of 1 to `max_pages` pages at draft to high quality.
    pub fn job_request(max_pages: u32) -> impl Strategy<Value = JobRequest> {
        (
            1..=max_pages,
            any::<bool>(),
            prop_oneof![Just(Quality::Draft), Just(Quality::Normal), Just(Quality::High)],
        )
            .prop_map(|(pages, color, quality)| {
                let request = JobRequest::new("generated.pdf", pages).with_quality(quality);
                if color { request.in_color() } else { request }
            })
    }

    /// Elapsed seconds, weighted toward short gaps.
    pub fn elapsed_seconds() -> impl Strategy<Value = i64> {
        prop_oneof![
            3 => 0i64..120,
            2 => 120i64..3_600,
            1 => 3_600i64..86_400,
        ]
    }
}

/// 2025-01-01 00:00:00 UTC, the instant every fixture starts at.
#[must_use]
pub fn test_time() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use random::{AlwaysRandom, NeverRandom, ScriptedRandom};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new(test_time());
        clock.advance(Duration::minutes(2));
        assert_eq!(clock.now(), test_time() + Duration::minutes(2));
        clock.set(test_time());
        assert_eq!(clock.now(), test_time());
    }

    #[test]
    fn scripted_random_falls_back() {
        let random = ScriptedRandom::with_fallback([0.1], 0.5);
        assert_eq!(random.remaining(), 1);
        assert!((random.next_f64() - 0.1).abs() < f64::EPSILON);
        assert!((random.next_f64() - 0.5).abs() < f64::EPSILON);
        assert_eq!(random.remaining(), 0);
    }

    #[test]
    fn fixture_printer_is_ready() {
        let printer = fixtures::printer("inkjet-home");
        assert_eq!(printer.status, printsim_core::printer::PrinterStatus::Ready);
        assert_eq!(printer.created_at, test_time());
    }
}
