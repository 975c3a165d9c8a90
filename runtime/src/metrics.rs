//! Prometheus metrics for the simulator.
//!
//! - Operations applied per printer, with outcome and latency
//! - Reconciliations and the transitions they applied
//! - Jobs reaching a terminal state
//! - Storage conflicts and failures
//! - Conflict retries
//!
//! # Example
//!
//! ```rust,no_run
//! use printsim_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Render the current values in Prometheus text format
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use printsim_core::reconciler::SimEvent;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder and renderer.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address reported for scraping (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), the existing one
    /// is kept and `handle()` stays `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Address metrics are reported for.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "printsim_operations_total",
        "Printer operations applied, labelled by operation and outcome"
    );
    describe_histogram!(
        "printsim_operation_duration_seconds",
        "Time taken by a full load, reconcile, apply, save cycle"
    );
    describe_counter!(
        "printsim_reconciliations_total",
        "Reconciliations run, labelled by whether they changed the snapshot"
    );
    describe_counter!(
        "printsim_sim_events_total",
        "Transitions applied by reconciliation, labelled by event"
    );
    describe_counter!(
        "printsim_jobs_finished_total",
        "Jobs that reached a terminal state, labelled by status"
    );
    describe_counter!(
        "printsim_storage_conflicts_total",
        "Saves rejected by the optimistic version check"
    );
    describe_counter!(
        "printsim_storage_errors_total",
        "Storage failures other than conflicts, labelled by backend"
    );
    describe_histogram!(
        "printsim_storage_query_duration_seconds",
        "Round trip of a single backend query, labelled by backend and operation"
    );
    describe_counter!(
        "printsim_retry_attempts_total",
        "Total number of retry attempts"
    );
    describe_counter!(
        "printsim_retry_successes_total",
        "Requests that succeeded after at least one retry"
    );
    describe_counter!(
        "printsim_retry_exhausted_total",
        "Requests that failed after exhausting retries"
    );
}

/// Operation metrics recorder.
pub struct OperationMetrics;

impl OperationMetrics {
    /// Record one applied or rejected operation.
    pub fn record(operation: &'static str, accepted: bool, duration: Duration) {
        let outcome = if accepted { "accepted" } else { "rejected" };
        counter!("printsim_operations_total", "operation" => operation, "outcome" => outcome)
            .increment(1);
        histogram!("printsim_operation_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }
}

/// Reconciliation metrics recorder.
pub struct ReconcileMetrics;

impl ReconcileMetrics {
    /// Record one reconciliation and the transitions it applied.
    pub fn record(events: &[SimEvent]) {
        let changed = if events.is_empty() { "false" } else { "true" };
        counter!("printsim_reconciliations_total", "changed" => changed).increment(1);

        for event in events {
            let name = match event {
                SimEvent::WarmedUp { .. } => "warmed_up",
                SimEvent::FellAsleep { .. } => "fell_asleep",
                SimEvent::JobStarted { .. } => "job_started",
                SimEvent::JobCompleted { .. } => {
                    counter!("printsim_jobs_finished_total", "status" => "completed").increment(1);
                    "job_completed"
                }
                SimEvent::JobFailed { .. } => {
                    counter!("printsim_jobs_finished_total", "status" => "failed").increment(1);
                    "job_failed"
                }
                SimEvent::ErrorInjected { .. } => "error_injected",
                SimEvent::CatchUpLimitReached { .. } => "catch_up_limit_reached",
            };
            counter!("printsim_sim_events_total", "event" => name).increment(1);
        }
    }
}

/// Storage metrics recorder.
pub struct StorageMetrics;

impl StorageMetrics {
    /// Record a save rejected by the version check.
    pub fn record_conflict(backend: &'static str) {
        counter!("printsim_storage_conflicts_total", "backend" => backend).increment(1);
    }

    /// Record any other storage failure.
    pub fn record_error(backend: &'static str) {
        counter!("printsim_storage_errors_total", "backend" => backend).increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("printsim_retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("printsim_retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("printsim_retry_exhausted_total").increment(1);
    }
}
