//! Simulation tunables.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid simulation configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid simulation setting `{field}`: {reason}")]
pub struct ConfigError {
    /// Offending field
    pub field: &'static str,
    /// What is wrong with it
    pub reason: String,
}

/// Tunables for the simulation.
///
/// # Default Values
///
/// - `error_probability`: 0.02 (2% of job starts hit a fault)
/// - `paper_jam_share`: 0.7 (70% of faults are paper jams)
/// - `warmup_seconds`: 10
/// - `speed_multiplier`: 1.0
/// - `max_jobs_per_reconcile`: 64
/// - `max_queue_length`: 32
/// - `initial_paper_fraction`: 0.8
/// - `completed_history_limit`: 50
/// - `log_limit`: 100
/// - `max_pages_per_job`: 999
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Chance that a job start triggers a simulated fault
    pub error_probability: f64,
    /// Share of faults that are paper jams (the rest are hardware errors)
    pub paper_jam_share: f64,
    /// Seconds spent in `warming_up` before becoming `ready`
    pub warmup_seconds: u32,
    /// Scales every job duration (0.1 = ten times faster than real time)
    pub speed_multiplier: f64,
    /// Upper bound on job starts applied by one reconciliation
    pub max_jobs_per_reconcile: usize,
    /// Jobs a printer accepts (queued plus current)
    pub max_queue_length: usize,
    /// Share of tray capacity loaded into newly added printers
    pub initial_paper_fraction: f64,
    /// Finished jobs kept per printer
    pub completed_history_limit: usize,
    /// Activity log entries kept per printer
    pub log_limit: usize,
    /// Largest accepted job
    pub max_pages_per_job: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            error_probability: 0.02,
            paper_jam_share: 0.7,
            warmup_seconds: 10,
            speed_multiplier: 1.0,
            max_jobs_per_reconcile: 64,
            max_queue_length: 32,
            initial_paper_fraction: 0.8,
            completed_history_limit: 50,
            log_limit: 100,
            max_pages_per_job: 999,
        }
    }
}

impl SimulationConfig {
    /// Configuration with fault injection disabled.
    #[must_use]
    pub fn without_faults() -> Self {
        Self {
            error_probability: 0.0,
            ..Self::default()
        }
    }

    /// Checks every value is in range.
    ///
    /// The queue limit must stay below the catch-up bound so a single
    /// reconciliation can always drain a full queue.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.error_probability) {
            return Err(invalid("error_probability", "must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.paper_jam_share) {
            return Err(invalid("paper_jam_share", "must be within [0, 1]"));
        }
        if !(self.speed_multiplier.is_finite() && self.speed_multiplier > 0.0) {
            return Err(invalid("speed_multiplier", "must be a positive number"));
        }
        if !(0.0..=1.0).contains(&self.initial_paper_fraction) {
            return Err(invalid("initial_paper_fraction", "must be within [0, 1]"));
        }
        if self.max_queue_length == 0 {
            return Err(invalid("max_queue_length", "must be positive"));
        }
        if self.max_jobs_per_reconcile <= self.max_queue_length {
            return Err(invalid(
                "max_jobs_per_reconcile",
                "must be greater than max_queue_length",
            ));
        }
        if self.max_pages_per_job == 0 {
            return Err(invalid("max_pages_per_job", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can unwrap
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(SimulationConfig::default().validate(), Ok(()));
        assert_eq!(SimulationConfig::without_faults().validate(), Ok(()));
    }

    #[test]
    fn catch_up_bound_must_exceed_queue_limit() {
        let config = SimulationConfig {
            max_jobs_per_reconcile: 8,
            max_queue_length: 8,
            ..SimulationConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "max_jobs_per_reconcile");
    }

    #[test]
    fn rejects_probability_out_of_range() {
        let config = SimulationConfig {
            error_probability: 1.5,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: SimulationConfig =
            serde_json::from_str(r#"{"warmup_seconds": 3}"#).unwrap();
        assert_eq!(config.warmup_seconds, 3);
        assert_eq!(config.max_queue_length, 32);
    }
}
