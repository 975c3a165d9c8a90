//! # Printsim Runtime
//!
//! Imperative shell around the pure simulation core.
//!
//! The core decides what a printer looks like at an instant; this crate
//! loads snapshots, runs them through the reconciler and the printer
//! reducer, and persists the result with an optimistic version check.
//!
//! ## Core Components
//!
//! - **[`PrinterService`]**: load → reconcile → apply → reconcile → save per printer
//! - **[`FleetService`]**: registry CRUD, routing with the confirmation gate, user settings
//! - **[`FileSnapshotStore`]**: JSON-file storage backend
//! - **[`Config`]**: environment-driven configuration
//! - **[`RetryPolicy`]**: backoff for version conflicts
//!
//! ## Example
//!
//! ```rust,no_run
//! use printsim_runtime::{Config, FleetService};
//! use printsim_testing::InMemorySnapshotStore;
//! use printsim_core::environment::{SystemClock, ThreadRandom};
//! use printsim_core::operations::{PrinterAction, PrinterEnvironment};
//! use printsim_core::types::PrinterId;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env();
//! let env = PrinterEnvironment::new(Arc::new(SystemClock), Arc::new(ThreadRandom), config.simulation.clone());
//! let fleet = FleetService::new(Arc::new(InMemorySnapshotStore::new()), env)
//!     .with_retry_policy(config.retry_policy());
//!
//! fleet.bootstrap().await?;
//! fleet.printers().execute(&PrinterId::new("home-inkjet"), PrinterAction::NozzleCheck).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod file_store;
pub mod fleet_service;
pub mod health;
pub mod metrics;
pub mod printers;
pub mod repository;
pub mod retry;

pub use config::{Config, StorageBackend, StorageConfig};
pub use error::ServiceError;
pub use file_store::FileSnapshotStore;
pub use fleet_service::{FleetService, NewPrinter, PrintRequest, PrintResult, PrinterSummary};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use printers::PrinterService;
pub use retry::RetryPolicy;
