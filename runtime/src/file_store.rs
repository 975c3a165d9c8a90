//! One JSON file per key in a data directory.
//!
//! Each file starts with a header line carrying the record version:
//!
//! ```text
//! printsim-v1 7
//! {"id":"home-laser", ...}
//! ```
//!
//! Writes go to a temporary file that is renamed over the target, so a
//! crash never leaves a half-written snapshot. Compare-and-swap is
//! serialized by an in-process lock; two processes sharing a directory are
//! not protected from each other.

use printsim_core::storage::{
    SnapshotStore, StorageError, StorageKey, StoreFuture, StoredRecord, Version, check_version,
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const HEADER_MAGIC: &str = "printsim-v1";

/// File-backed [`SnapshotStore`].
///
/// # Example
///
/// ```rust,no_run
/// use printsim_runtime::file_store::FileSnapshotStore;
/// use printsim_core::storage::{SnapshotStore, StorageKey, Version};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = FileSnapshotStore::new("./printsim-data");
/// store.health_check().await?;
/// store.save(StorageKey::Settings, b"{}".to_vec(), Some(Version::ABSENT)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct FileSnapshotStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileSnapshotStore {
    /// Creates a store rooted at `root`. The directory is created on first
    /// write or health check.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Data directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File that holds `key`.
    #[must_use]
    pub fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.root.join(file_name(key))
    }

    async fn read(&self, key: &StorageKey) -> Result<Option<StoredRecord>, StorageError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, &e)),
        };
        parse(key, &bytes).map(Some)
    }

    async fn write(&self, key: &StorageKey, payload: Vec<u8>, expected: Option<Version>) -> Result<Version, StorageError> {
        let _guard = self.write_lock.lock().await;

        let actual = match self.read(key).await {
            Ok(record) => record.map_or(Version::ABSENT, |r| r.version),
            // A corrupt record may be replaced unconditionally.
            Err(StorageError::CorruptSnapshot { .. }) if expected.is_none() => Version::ABSENT,
            Err(e) => return Err(e),
        };
        check_version(key, expected, actual)?;
        let version = actual.next();

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(&self.root, &e))?;

        let mut contents = format!("{HEADER_MAGIC} {version}\n").into_bytes();
        contents.extend_from_slice(&payload);

        let path = self.path_for(key);
        let temp_path = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| io_error(&temp_path, &e))?;
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(io_error(&path, &e));
        }

        tracing::trace!(path = %path.display(), %version, "Snapshot file written");
        Ok(version)
    }

    async fn remove(&self, key: &StorageKey) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, &e)),
        }
    }

    async fn probe(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::Unavailable(format!("{}: {e}", self.root.display())))?;
        let metadata = tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| StorageError::Unavailable(format!("{}: {e}", self.root.display())))?;
        if metadata.permissions().readonly() {
            return Err(StorageError::Unavailable(format!(
                "{} is read-only",
                self.root.display()
            )));
        }
        Ok(())
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, key: StorageKey) -> StoreFuture<'_, Option<StoredRecord>> {
        Box::pin(async move { self.read(&key).await })
    }

    fn save(&self, key: StorageKey, payload: Vec<u8>, expected: Option<Version>) -> StoreFuture<'_, Version> {
        Box::pin(async move { self.write(&key, payload, expected).await })
    }

    fn clear(&self, key: StorageKey) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.remove(&key).await })
    }

    fn health_check(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.probe())
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}

/// `fleet.json`, `settings.json` or `printer.{id}.json` with the id
/// percent-encoded outside `[A-Za-z0-9_-]`.
fn file_name(key: &StorageKey) -> String {
    match key {
        StorageKey::Fleet => "fleet.json".to_string(),
        StorageKey::Settings => "settings.json".to_string(),
        StorageKey::Printer(id) => {
            let mut name = String::from("printer.");
            for byte in id.as_str().bytes() {
                if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                    name.push(char::from(byte));
                } else {
                    name.push_str(&format!("%{byte:02X}"));
                }
            }
            name.push_str(".json");
            name
        }
    }
}

fn parse(key: &StorageKey, bytes: &[u8]) -> Result<StoredRecord, StorageError> {
    let corrupt = |reason: &str| StorageError::CorruptSnapshot {
        key: key.clone(),
        reason: reason.to_string(),
    };

    let newline = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| corrupt("missing header line"))?;
    let header = std::str::from_utf8(&bytes[..newline]).map_err(|_| corrupt("header is not UTF-8"))?;
    let version = header
        .strip_prefix(HEADER_MAGIC)
        .and_then(|rest| rest.trim().parse::<u64>().ok())
        .ok_or_else(|| corrupt("unrecognized header"))?;

    Ok(StoredRecord {
        version: Version::new(version),
        payload: bytes[newline + 1..].to_vec(),
    })
}

fn io_error(path: &Path, error: &std::io::Error) -> StorageError {
    StorageError::Backend(format!("{}: {error}", path.display()))
}
