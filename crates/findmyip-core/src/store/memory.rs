// # Memory Address Store
//
// In-memory implementation of AddressStore.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts.
// Useful for testing, ephemeral runs, or scenarios where history loss on
// restart is acceptable.
//
// ## Crash Behavior
//
// - All history is lost on restart/crash
// - First observation after restart is always appended (no latest record)

use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_stream::Stream;

use async_trait::async_trait;

use super::{HistoryWatch, is_distinct};
use crate::Error;
use crate::traits::{AddressRecord, AddressStore, IpVersion};

/// In-memory address store implementation
///
/// History lives in per-family vectors behind a RwLock. The write lock is
/// the insert transaction: the check-then-insert sequence runs under one
/// exclusive guard, so racing refresh completions serialize and at most one
/// of two identical observations is appended.
///
/// # Example
///
/// ```rust,no_run
/// use findmyip_core::store::MemoryAddressStore;
/// use findmyip_core::traits::{AddressRecord, AddressStore, IpVersion};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryAddressStore::new();
///
///     let inserted = store
///         .insert_if_distinct(AddressRecord::new("198.51.100.7", IpVersion::V4))
///         .await?;
///     assert!(inserted);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryAddressStore {
    inner: Arc<RwLock<[Vec<AddressRecord>; 2]>>,
    watch: Arc<HistoryWatch>,
}

impl MemoryAddressStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new([Vec::new(), Vec::new()])),
            watch: Arc::new(HistoryWatch::new()),
        }
    }

    /// Number of records stored for a family
    pub async fn len(&self, version: IpVersion) -> usize {
        self.inner.read().await[version.slot()].len()
    }

    /// Check if the store holds no records at all
    pub async fn is_empty(&self) -> bool {
        let guard = self.inner.read().await;
        guard.iter().all(|records| records.is_empty())
    }
}

impl Default for MemoryAddressStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AddressStore for MemoryAddressStore {
    async fn insert_if_distinct(&self, record: AddressRecord) -> Result<bool, Error> {
        let mut guard = self.inner.write().await;
        let records = &mut guard[record.version.slot()];

        if !is_distinct(records.last(), &record) {
            return Ok(false);
        }

        // Latest-record state must stay consistent under the write lock.
        debug_assert!(
            records
                .last()
                .is_none_or(|latest| latest.timestamp_ms() <= record.timestamp_ms()),
            "insert would break timestamp order"
        );

        let version = record.version;
        records.push(record);
        // Publish under the lock so snapshots arrive in mutation order.
        self.watch.publish(version, records.clone());
        Ok(true)
    }

    async fn latest(&self, version: IpVersion) -> Result<Option<AddressRecord>, Error> {
        let guard = self.inner.read().await;
        Ok(guard[version.slot()].last().cloned())
    }

    fn observe_history(
        &self,
        version: IpVersion,
    ) -> Pin<Box<dyn Stream<Item = Vec<AddressRecord>> + Send + 'static>> {
        self.watch.observe(version)
    }

    async fn delete_all(&self) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        for version in IpVersion::ALL {
            guard[version.slot()].clear();
            self.watch.publish(version, Vec::new());
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        // No-op for memory store (everything is already "persisted")
        Ok(())
    }
}
