// # File Address Store
//
// File-based implementation of AddressStore with crash recovery.
//
// ## Purpose
//
// Provides persistent address history across restarts and crashes. An
// insert is only acknowledged (and only published to observers) once it has
// landed on disk.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "v4": [
//     { "ip": "198.51.100.7", "observed_at": 1736424000000, "version": "v4" }
//   ],
//   "v6": []
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tokio_stream::Stream;

use super::{HistoryWatch, is_distinct};
use crate::Error;
use crate::traits::{AddressRecord, AddressStore, IpVersion};

/// History file format version
/// Used for future migration if format changes
const HISTORY_FILE_VERSION: &str = "1.0";

/// File-based address store with crash recovery
///
/// This implementation persists history to a JSON file with atomic writes
/// and automatic corruption recovery. The write lock is held across the
/// whole check-then-insert-then-persist sequence, so readers never observe
/// a record that did not land on disk and racing inserts serialize.
///
/// # Example
///
/// ```rust,no_run
/// use findmyip_core::store::FileAddressStore;
/// use findmyip_core::traits::{AddressRecord, AddressStore, IpVersion};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileAddressStore::new("/var/lib/findmyip/history.json").await?;
///
///     store
///         .insert_if_distinct(AddressRecord::new("198.51.100.7", IpVersion::V4))
///         .await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileAddressStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
    watch: Arc<HistoryWatch>,
}

/// Internal state for the file-based store
#[derive(Debug)]
struct FileState {
    records: [Vec<AddressRecord>; 2],
    dirty: bool,
}

/// Serializable history file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct HistoryFileFormat {
    version: String,
    #[serde(default)]
    v4: Vec<AddressRecord>,
    #[serde(default)]
    v6: Vec<AddressRecord>,
}

impl FileAddressStore {
    /// Create or load a file address store
    ///
    /// This will:
    /// 1. Try to load the existing history file
    /// 2. If corruption is detected, try to load from backup
    /// 3. If both fail, start with empty history
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create history directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        // Try to load existing history
        let records = Self::load_with_recovery(&path).await?;

        let watch = Arc::new(HistoryWatch::new());
        for version in IpVersion::ALL {
            watch.publish(version, records[version.slot()].clone());
        }

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                records,
                dirty: false,
            })),
            watch,
        })
    }

    /// Load history from file with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load main history file
    /// 2. If JSON parse error, try loading backup
    /// 3. If backup also fails, start with empty history
    async fn load_with_recovery(path: &Path) -> Result<[Vec<AddressRecord>; 2], Error> {
        match Self::load_history(path).await {
            Ok(records) => {
                tracing::debug!(
                    "Loaded history from file: {} IPv4, {} IPv6 records",
                    records[0].len(),
                    records[1].len()
                );
                Ok(records)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "History file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty history.");
                    return Ok([Vec::new(), Vec::new()]);
                }

                match Self::load_history(&backup_path).await {
                    Ok(records) => {
                        tracing::info!(
                            "Recovered history from backup: {} IPv4, {} IPv6 records",
                            records[0].len(),
                            records[1].len()
                        );

                        // Replace the corrupted file with the backup
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore history file from backup: {}",
                                restore_err
                            );
                        }

                        Ok(records)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also corrupted: {}. Starting with empty history.",
                            backup_err
                        );
                        Ok([Vec::new(), Vec::new()])
                    }
                }
            }
            // Other error (not corruption)
            Err(e) => Err(e),
        }
    }

    /// Load history from a file
    async fn load_history(path: &Path) -> Result<[Vec<AddressRecord>; 2], Error> {
        if !path.exists() {
            tracing::debug!("History file does not exist: {}", path.display());
            return Ok([Vec::new(), Vec::new()]);
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::store(format!(
                "Failed to read history file {}: {}",
                path.display(),
                e
            ))
        })?;

        let history_file: HistoryFileFormat = serde_json::from_str(&content)?;

        if history_file.version != HISTORY_FILE_VERSION {
            tracing::warn!(
                "History file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                HISTORY_FILE_VERSION,
                history_file.version
            );
        }

        Ok([history_file.v4, history_file.v6])
    }

    /// Write history to file atomically
    ///
    /// Called while the caller holds the state write lock, so writes land in
    /// mutation order.
    async fn write_history(&self, records: &[Vec<AddressRecord>; 2]) -> Result<(), Error> {
        let history_file = HistoryFileFormat {
            version: HISTORY_FILE_VERSION.to_string(),
            v4: records[0].clone(),
            v6: records[1].clone(),
        };

        let json = serde_json::to_string_pretty(&history_file)
            .map_err(|e| Error::store(format!("Failed to serialize history: {}", e)))?;

        // Write to temporary file first
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        // Create backup of current file (if it exists)
        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        // Atomic rename (temp -> actual)
        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("History written to file: {}", self.path.display());
        Ok(())
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl AddressStore for FileAddressStore {
    async fn insert_if_distinct(&self, record: AddressRecord) -> Result<bool, Error> {
        let mut guard = self.state.write().await;
        let slot = record.version.slot();

        if !is_distinct(guard.records[slot].last(), &record) {
            return Ok(false);
        }

        debug_assert!(
            guard.records[slot]
                .last()
                .is_none_or(|latest| latest.timestamp_ms() <= record.timestamp_ms()),
            "insert would break timestamp order"
        );

        let version = record.version;
        guard.records[slot].push(record);
        guard.dirty = true;

        // The insert is not observable until the write lands on disk.
        if let Err(e) = self.write_history(&guard.records).await {
            guard.records[slot].pop();
            return Err(e);
        }
        guard.dirty = false;

        self.watch.publish(version, guard.records[slot].clone());
        Ok(true)
    }

    async fn latest(&self, version: IpVersion) -> Result<Option<AddressRecord>, Error> {
        let guard = self.state.read().await;
        Ok(guard.records[version.slot()].last().cloned())
    }

    fn observe_history(
        &self,
        version: IpVersion,
    ) -> Pin<Box<dyn Stream<Item = Vec<AddressRecord>> + Send + 'static>> {
        self.watch.observe(version)
    }

    async fn delete_all(&self) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        let previous = guard.records.clone();
        guard.records = [Vec::new(), Vec::new()];
        guard.dirty = true;

        if let Err(e) = self.write_history(&guard.records).await {
            guard.records = previous;
            return Err(e);
        }
        guard.dirty = false;

        for version in IpVersion::ALL {
            self.watch.publish(version, Vec::new());
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        if guard.dirty {
            self.write_history(&guard.records).await?;
            guard.dirty = false;
        }
        Ok(())
    }
}
