//! Redis snapshot store for the printer simulator.
//!
//! Each record is a hash at `{prefix}:{key}` with two fields, `version` and
//! `payload`. Saves run a Lua script so the version comparison and the write
//! happen atomically on the server, which makes the store safe to share
//! between processes.
//!
//! # Example
//!
//! ```no_run
//! use printsim_redis::RedisSnapshotStore;
//! use printsim_core::storage::SnapshotStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisSnapshotStore::new("redis://127.0.0.1:6379", "printsim").await?;
//! store.health_check().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use printsim_core::storage::{
    SnapshotStore, StorageError, StorageKey, StoreFuture, StoredRecord, Version,
};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::time::Instant;

/// Compare-and-swap.
///
/// `ARGV[1]` is the expected version, or `-1` for an unconditional write.
/// Returns `{1, new_version}` on success, `{0, current_version}` on a
/// version mismatch and `{0, -1}` when the stored version is unreadable.
const CAS_SCRIPT: &str = r"
local raw = redis.call('HGET', KEYS[1], 'version')
local current = tonumber(raw)
local expected = tonumber(ARGV[1])
if expected >= 0 then
    if raw and not current then
        return {0, -1}
    end
    current = current or 0
    if current ~= expected then
        return {0, current}
    end
end
local next_version = (current or 0) + 1
redis.call('HSET', KEYS[1], 'version', next_version, 'payload', ARGV[2])
return {1, next_version}
";

const UNCONDITIONAL: i64 = -1;

/// `Redis`-backed [`SnapshotStore`].
#[derive(Clone)]
pub struct RedisSnapshotStore {
    conn_manager: ConnectionManager,
    prefix: String,
    cas_script: Script,
}

impl RedisSnapshotStore {
    /// Connects to `redis_url` and namespaces every key under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the connection fails.
    pub async fn new(redis_url: &str, prefix: impl Into<String>) -> Result<Self, StorageError> {
        let client = Client::open(redis_url)
            .map_err(|e| StorageError::Backend(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            StorageError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
        })?;

        let prefix = prefix.into();
        tracing::info!(%prefix, "Connected to Redis snapshot store");
        Ok(Self {
            conn_manager,
            prefix,
            cas_script: Script::new(CAS_SCRIPT),
        })
    }

    /// Key namespace.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Redis key that holds `key`.
    #[must_use]
    pub fn redis_key(&self, key: &StorageKey) -> String {
        namespaced(&self.prefix, key)
    }

    async fn fetch(&self, key: &StorageKey) -> Result<Option<StoredRecord>, StorageError> {
        let mut conn = self.conn_manager.clone();
        let started = Instant::now();
        let (version, payload): (Option<String>, Option<Vec<u8>>) = redis::cmd("HMGET")
            .arg(self.redis_key(key))
            .arg("version")
            .arg("payload")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        record_query("load", started);

        match (version, payload) {
            (None, None) => Ok(None),
            (Some(version), Some(payload)) => {
                let version = version.parse::<u64>().map_err(|_| StorageError::CorruptSnapshot {
                    key: key.clone(),
                    reason: format!("unreadable version {version:?}"),
                })?;
                Ok(Some(StoredRecord {
                    version: Version::new(version),
                    payload,
                }))
            }
            _ => Err(StorageError::CorruptSnapshot {
                key: key.clone(),
                reason: "hash is missing a field".to_string(),
            }),
        }
    }

    async fn write(
        &self,
        key: &StorageKey,
        payload: Vec<u8>,
        expected: Option<Version>,
    ) -> Result<Version, StorageError> {
        let mut conn = self.conn_manager.clone();
        let expected_arg = match expected {
            None => UNCONDITIONAL,
            Some(version) => i64::try_from(version.value())
                .map_err(|_| StorageError::Backend(format!("Version {version} is out of range")))?,
        };

        let started = Instant::now();
        let (written, version): (i64, i64) = self
            .cas_script
            .key(self.redis_key(key))
            .arg(expected_arg)
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        record_query("save", started);

        if written == 1 {
            return u64::try_from(version)
                .map(Version::new)
                .map_err(|_| StorageError::Backend(format!("Script returned version {version}")));
        }

        match u64::try_from(version) {
            Ok(actual) => {
                let expected = expected.unwrap_or(Version::ABSENT);
                let actual = Version::new(actual);
                tracing::debug!(%key, %expected, %actual, "Snapshot compare-and-swap lost");
                Err(StorageError::ConcurrencyConflict {
                    key: key.clone(),
                    expected,
                    actual,
                })
            }
            Err(_) => Err(StorageError::CorruptSnapshot {
                key: key.clone(),
                reason: "unreadable version".to_string(),
            }),
        }
    }

    async fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        let mut conn = self.conn_manager.clone();
        let started = Instant::now();
        let _: () = conn
            .del(self.redis_key(key))
            .await
            .map_err(map_redis_error)?;
        record_query("clear", started);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisSnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSnapshotStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl SnapshotStore for RedisSnapshotStore {
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
        "redis"
    }
}

fn namespaced(prefix: &str, key: &StorageKey) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}:{key}")
    }
}

fn map_redis_error(error: RedisError) -> StorageError {
    if error.is_io_error()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || error.is_timeout()
    {
        StorageError::Unavailable(error.to_string())
    } else {
        StorageError::Backend(error.to_string())
    }
}

fn record_query(operation: &'static str, started: Instant) {
    metrics::histogram!(
        "printsim_storage_query_duration_seconds",
        "backend" => "redis",
        "operation" => operation
    )
    .record(started.elapsed().as_secs_f64());
}
