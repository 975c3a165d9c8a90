//! `PostgreSQL` snapshot store for the printer simulator.
//!
//! Implements [`SnapshotStore`] on a single table:
//!
//! ```sql
//! CREATE TABLE printsim_snapshots (
//!     key        TEXT PRIMARY KEY,
//!     version    BIGINT NOT NULL,
//!     payload    BYTEA NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```
//!
//! Compare-and-swap is a conditional statement evaluated by the database, so
//! any number of processes may share one table:
//!
//! - first save: `INSERT ... ON CONFLICT DO NOTHING`
//! - later saves: `UPDATE ... WHERE version = $expected`
//! - unconditional saves: `INSERT ... ON CONFLICT DO UPDATE`
//!
//! When the conditional statement touches no row the store reads the
//! current version and reports [`StorageError::ConcurrencyConflict`].
//!
//! # Example
//!
//! ```no_run
//! use printsim_postgres::PostgresSnapshotStore;
//! use printsim_core::storage::SnapshotStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresSnapshotStore::connect("postgres://localhost/printsim", 5).await?;
//! store.migrate().await?;
//! store.health_check().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use printsim_core::storage::{
    SnapshotStore, StorageError, StorageKey, StoreFuture, StoredRecord, Version,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::{Duration, Instant};

/// `PostgreSQL`-backed [`SnapshotStore`].
#[derive(Clone, Debug)]
pub struct PostgresSnapshotStore {
    pool: PgPool,
}

impl PostgresSnapshotStore {
    /// Connects a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Unavailable(format!("Failed to connect to database: {e}")))?;

        tracing::info!(max_connections, "Connected to PostgreSQL snapshot store");
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the snapshot table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the DDL fails.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS printsim_snapshots (
                key TEXT PRIMARY KEY,
                version BIGINT NOT NULL CHECK (version > 0),
                payload BYTEA NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        tracing::debug!("Snapshot table ready");
        Ok(())
    }

    async fn fetch(&self, key: &StorageKey) -> Result<Option<StoredRecord>, StorageError> {
        let started = Instant::now();
        let row = sqlx::query("SELECT version, payload FROM printsim_snapshots WHERE key = $1")
            .bind(key.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        record_query("load", started);

        row.map(|row| {
            let version: i64 = row.try_get("version").map_err(map_sqlx_error)?;
            let payload: Vec<u8> = row.try_get("payload").map_err(map_sqlx_error)?;
            Ok(StoredRecord {
                version: from_db_version(key, version)?,
                payload,
            })
        })
        .transpose()
    }

    async fn current_version(&self, key: &StorageKey) -> Result<Version, StorageError> {
        let version: Option<i64> =
            sqlx::query_scalar::<_, i64>("SELECT version FROM printsim_snapshots WHERE key = $1")
                .bind(key.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        version.map_or(Ok(Version::ABSENT), |v| from_db_version(key, v))
    }

    async fn write(
        &self,
        key: &StorageKey,
        payload: Vec<u8>,
        expected: Option<Version>,
    ) -> Result<Version, StorageError> {
        let started = Instant::now();
        let written: Option<i64> = match expected {
            None => sqlx::query_scalar::<_, i64>(
                r"
                INSERT INTO printsim_snapshots (key, version, payload)
                VALUES ($1, 1, $2)
                ON CONFLICT (key) DO UPDATE
                    SET version = printsim_snapshots.version + 1,
                        payload = EXCLUDED.payload,
                        updated_at = now()
                RETURNING version
                ",
            )
            .bind(key.to_string())
            .bind(payload)
            .fetch_optional(&self.pool)
            .await,
            Some(Version::ABSENT) => sqlx::query_scalar::<_, i64>(
                r"
                INSERT INTO printsim_snapshots (key, version, payload)
                VALUES ($1, 1, $2)
                ON CONFLICT (key) DO NOTHING
                RETURNING version
                ",
            )
            .bind(key.to_string())
            .bind(payload)
            .fetch_optional(&self.pool)
            .await,
            Some(version) => sqlx::query_scalar::<_, i64>(
                r"
                UPDATE printsim_snapshots
                SET version = version + 1, payload = $2, updated_at = now()
                WHERE key = $1 AND version = $3
                RETURNING version
                ",
            )
            .bind(key.to_string())
            .bind(payload)
            .bind(to_db_version(version)?)
            .fetch_optional(&self.pool)
            .await,
        }
        .map_err(map_sqlx_error)?;
        record_query("save", started);

        match written {
            Some(version) => from_db_version(key, version),
            None => {
                let actual = self.current_version(key).await?;
                let expected = expected.unwrap_or(Version::ABSENT);
                tracing::debug!(%key, %expected, %actual, "Conditional snapshot write lost");
                Err(StorageError::ConcurrencyConflict {
                    key: key.clone(),
                    expected,
                    actual,
                })
            }
        }
    }

    async fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        let started = Instant::now();
        sqlx::query("DELETE FROM printsim_snapshots WHERE key = $1")
            .bind(key.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        record_query("clear", started);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

impl SnapshotStore for PostgresSnapshotStore {
    fn load(&self, key: StorageKey) -> StoreFuture<'_, Option<StoredRecord>> {
        Box::pin(async move { self.fetch(&key).await })
    }

    fn save(
        &self,
        key: StorageKey,
        payload: Vec<u8>,
        expected: Option<Version>,
    ) -> StoreFuture<'_, Version> {
        Box::pin(async move { self.write(&key, payload, expected).await })
    }

    fn clear(&self, key: StorageKey) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.delete(&key).await })
    }

    fn health_check(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.ping())
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}

/// Connection-level failures are worth retrying; everything else is not.
fn map_sqlx_error(error: sqlx::Error) -> StorageError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StorageError::Unavailable(error.to_string()),
        other => StorageError::Backend(other.to_string()),
    }
}

fn to_db_version(version: Version) -> Result<i64, StorageError> {
    i64::try_from(version.value())
        .map_err(|_| StorageError::Backend(format!("Version {version} exceeds BIGINT")))
}

fn from_db_version(key: &StorageKey, version: i64) -> Result<Version, StorageError> {
    u64::try_from(version)
        .map(Version::new)
        .map_err(|_| StorageError::CorruptSnapshot {
            key: key.clone(),
            reason: format!("negative version {version}"),
        })
}

fn record_query(operation: &'static str, started: Instant) {
    metrics::histogram!(
        "printsim_storage_query_duration_seconds",
        "backend" => "postgres",
        "operation" => operation
    )
    .record(started.elapsed().as_secs_f64());
}
