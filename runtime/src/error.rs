//! Error types for the simulator services.

use printsim_core::config::ConfigError;
use printsim_core::fleet::FleetError;
use printsim_core::operations::OperationError;
use printsim_core::reconciler::ReconcileError;
use printsim_core::routing::RoutingError;
use printsim_core::storage::StorageError;
use printsim_core::types::{JobId, PrinterId};
use thiserror::Error;

/// Errors returned by [`PrinterService`](crate::printers::PrinterService)
/// and [`FleetService`](crate::fleet_service::FleetService).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// No snapshot is stored for this printer
    #[error("Printer not found: {0}")]
    PrinterNotFound(PrinterId),

    /// The printer has no such job
    #[error("Job {job_id} not found on printer {printer_id}")]
    JobNotFound {
        /// Printer searched
        printer_id: PrinterId,
        /// Job requested
        job_id: JobId,
    },

    /// The fleet registry has not been bootstrapped
    #[error("Fleet not initialized; call bootstrap first")]
    NotInitialized,

    /// The operation was rejected; nothing changed
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// Fleet registry validation failed
    #[error(transparent)]
    Fleet(#[from] FleetError),

    /// No printer could take the request
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// A stored snapshot is structurally invalid
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// Storage failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ServiceError {
    /// Whether retrying the whole request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(error) => error.is_retryable(),
            _ => false,
        }
    }

    /// Whether the caller sent something invalid, as opposed to an
    /// infrastructure failure.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::PrinterNotFound(_)
                | Self::JobNotFound { .. }
                | Self::Operation(_)
                | Self::Fleet(_)
                | Self::Routing(_)
        )
    }
}

/// Result alias for service calls.
pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
