//! Health reporting for the simulator's dependencies.
//!
//! A [`HealthReport`] is the worst of its [`HealthCheck`]s. The fleet
//! service contributes two: the storage round trip and whether the registry
//! has been bootstrapped.

use chrono::{DateTime, Utc};
use printsim_core::storage::SnapshotStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Storage round trips slower than this are reported as degraded.
pub const SLOW_STORAGE_THRESHOLD: Duration = Duration::from_millis(500);

/// Health of one component, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Fully operational
    Healthy,

    /// Answering, but slowly or without its data (e.g. fleet not seeded)
    Degraded,

    /// Not answering
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// The worse of two statuses.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

/// Result of probing one component.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// `storage`, `fleet`, ...
    pub component: String,
    /// Outcome
    pub status: HealthStatus,
    /// Why it is not healthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Backend name, latency, record counts
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl HealthCheck {
    fn new(component: impl Into<String>, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            component: component.into(),
            status,
            message,
            metadata: BTreeMap::new(),
        }
    }

    /// A passing check.
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Healthy, None)
    }

    /// A check that passed with a caveat.
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Degraded, Some(message.into()))
    }

    /// A failing check.
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Unhealthy, Some(message.into()))
    }

    /// Attaches a detail, replacing any earlier value for `key`.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Every check plus the overall verdict.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status among `checks`; healthy when there are none
    pub status: HealthStatus,
    /// Individual checks
    pub checks: Vec<HealthCheck>,
    /// When the report was produced
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Aggregates checks.
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);
        Self {
            status,
            checks,
            checked_at: Utc::now(),
        }
    }

    /// Whether every check passed.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// The check for `component`, if one was run.
    #[must_use]
    pub fn check(&self, component: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.component == component)
    }
}

/// Probes a snapshot store and times the round trip.
pub async fn check_store(store: &dyn SnapshotStore) -> HealthCheck {
    let started = Instant::now();
    let result = store.health_check().await;
    let elapsed = started.elapsed();

    let check = match result {
        Err(error) => HealthCheck::unhealthy("storage", error.to_string()),
        Ok(()) if elapsed > SLOW_STORAGE_THRESHOLD => {
            HealthCheck::degraded("storage", "Storage responded slowly")
        }
        Ok(()) => HealthCheck::healthy("storage"),
    };
    check
        .with_metadata("backend", store.kind())
        .with_metadata("latency_ms", elapsed.as_millis().to_string())
}
