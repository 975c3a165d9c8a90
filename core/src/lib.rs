//! # Printsim Core
//!
//! Pure simulation core for a fleet of virtual printers.
//!
//! A printer is never "running". Every request loads a persisted snapshot,
//! brings it up to date from wall-clock time, applies one operation as a pure
//! transition, and hands the result back to the caller for persistence. This
//! crate contains everything between "load" and "save"; it performs no I/O.
//!
//! ## Core Concepts
//!
//! - **Snapshot**: [`printer::PrinterInstance`], the complete persisted state of one printer
//! - **Reconciliation**: [`reconciler::reconcile`] replays what "should have happened"
//!   since the snapshot was last observed (job progress, ink and paper usage, faults)
//! - **Reducer**: [`operations::PrinterReducer`] applies control operations
//!   (print, cancel, refill, maintenance) as validated transitions
//! - **Environment**: clock, randomness and tunables injected via traits
//! - **Routing**: [`routing::find_best_printer`] picks a printer for a location,
//!   falling back when the default is unavailable
//!
//! ## Request Flow
//!
//! ```text
//! load(snapshot) → reconcile(now) → reduce(action) → reconcile(now) → save(snapshot)
//! ```
//!
//! ## Example
//!
//! ```
//! use printsim_core::catalog::builtin_type;
//! use printsim_core::config::SimulationConfig;
//! use printsim_core::environment::ThreadRandom;
//! use printsim_core::printer::PrinterInstance;
//! use printsim_core::reconciler::reconcile;
//! use printsim_core::types::PrinterId;
//! use chrono::Utc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SimulationConfig::default();
//! let hardware = builtin_type("laser-mono").ok_or("missing type")?;
//! let now = Utc::now();
//! let printer = PrinterInstance::seeded(PrinterId::new("demo"), "Demo", &hardware, None, &config, now);
//!
//! let reconciled = reconcile(&printer, now, &ThreadRandom, &config)?;
//! assert_eq!(reconciled.snapshot.status, printer.status);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

pub mod catalog;
pub mod config;
pub mod fleet;
pub mod ink;
pub mod job;
pub mod operations;
pub mod printer;
pub mod reconciler;
pub mod resource;
pub mod routing;
pub mod seed;
pub mod settings;
pub mod storage;
pub mod types;
pub mod view;

/// Reducer module - The core trait for state transitions
///
/// Reducers are pure functions: `(State, Action, Environment) → Result<Output, Error>`.
///
/// A failed reduction must leave the state untouched, so reducers validate
/// the whole action before mutating anything.
pub mod reducer {
    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Output`: What a successful reduction reports back to the caller
    /// - `Error`: The typed rejection returned when validation fails
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for PrinterReducer {
    ///     type State = PrinterInstance;
    ///     type Action = PrinterAction;
    ///     type Environment = PrinterEnvironment;
    ///     type Output = ActionOutcome;
    ///     type Error = OperationError;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut PrinterInstance,
    ///         action: PrinterAction,
    ///         env: &PrinterEnvironment,
    ///     ) -> Result<ActionOutcome, OperationError> {
    ///         match action {
    ///             PrinterAction::Pause => { /* ... */ }
    ///             _ => { /* ... */ }
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// The result reported for a successful action
        type Output;

        /// The rejection reported for an invalid action
        type Error;

        /// Reduce an action into a state change
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Updates state in place (only when validation passed)
        /// 3. Returns a description of what happened
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action is rejected. The state is
        /// left exactly as it was.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<Self::Output, Self::Error>;
    }
}

/// Environment module - Dependency injection traits
///
/// All sources of non-determinism (time, randomness) are abstracted behind
/// traits and injected, so the simulation can be replayed exactly in tests.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use printsim_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let first = clock.now();
    /// assert!(clock.now() >= first);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Source of uniform random numbers in `[0, 1)`.
    ///
    /// Used for fault injection. Tests substitute a scripted source to force
    /// or forbid paper jams deterministically.
    pub trait RandomSource: Send + Sync {
        /// Next sample in `[0, 1)`.
        fn next_f64(&self) -> f64;
    }

    /// Production randomness backed by the thread-local generator.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ThreadRandom;

    impl RandomSource for ThreadRandom {
        fn next_f64(&self) -> f64 {
            rand::random::<f64>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, RandomSource, SystemClock, ThreadRandom};

    #[test]
    fn thread_random_stays_in_unit_interval() {
        for _ in 0..1_000 {
            let sample = ThreadRandom.next_f64();
            assert!((0.0..1.0).contains(&sample));
        }
    }

    #[test]
    fn system_clock_moves_forward() {
        let first = SystemClock.now();
        assert!(SystemClock.now() >= first);
    }
}
