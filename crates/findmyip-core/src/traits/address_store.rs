// # Address Store Trait
//
// Defines the interface for the durable log of observed addresses.
//
// ## Purpose
//
// The store is the single source of truth for address history:
// - Append-mostly: records are immutable once written; the only mutations
//   are the conditional insert and the bulk delete
// - Deduplicating: an observation identical to the latest record is a no-op
// - Live: every reader sees a continuously updated ordered sequence
//
// ## Implementations
//
// - File-based: JSON file with atomic writes and backup recovery
// - In-memory: for tests and ephemeral runs
//
// ## Usage
//
// ```rust,ignore
// use findmyip_core::{AddressRecord, AddressStore, IpVersion};
// use tokio_stream::StreamExt;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let store = /* AddressStore implementation */;
//
//     let inserted = store
//         .insert_if_distinct(AddressRecord::new("198.51.100.7", IpVersion::V4))
//         .await?;
//
//     let mut history = store.observe_history(IpVersion::V4);
//     while let Some(records) = history.next().await {
//         println!("{} records", records.len());
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

use super::IpVersion;

/// One observed address, as persisted
///
/// Records are immutable once written. The timestamp is assigned when the
/// record is built for insertion and is persisted at millisecond precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Textual representation of the address
    pub ip: String,
    /// When the address was observed
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub observed_at: DateTime<Utc>,
    /// Which IP family the address belongs to
    pub version: IpVersion,
}

impl AddressRecord {
    /// Create a record stamped with the current time
    pub fn new(ip: impl Into<String>, version: IpVersion) -> Self {
        Self {
            ip: ip.into(),
            observed_at: Utc::now(),
            version,
        }
    }

    /// Create a record with an explicit timestamp
    ///
    /// This constructor is public for use in:
    /// - Contract tests that need deterministic timestamps
    /// - Importing observations recorded elsewhere
    pub fn at(ip: impl Into<String>, version: IpVersion, at: DateTime<Utc>) -> Self {
        Self {
            ip: ip.into(),
            observed_at: at,
            version,
        }
    }

    /// Timestamp at the precision the store persists and compares
    pub fn timestamp_ms(&self) -> i64 {
        self.observed_at.timestamp_millis()
    }
}

/// Trait for address store implementations
///
/// This trait defines the interface for the persistent address history.
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks. The
/// conditional insert is the only write path that appends; implementations
/// must execute its check-then-insert sequence atomically so that racing
/// refresh completions cannot both observe "no latest" and both insert.
#[async_trait]
pub trait AddressStore: Send + Sync {
    /// Insert `record` only if it is distinct from the latest record of the
    /// same family
    ///
    /// "Distinct" means: no prior record exists, or the latest record's ip
    /// differs from the new one's. A record whose timestamp equals the
    /// latest record's timestamp is never inserted, so a duplicate-fire
    /// refresh at the same instant stays a no-op.
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: The record was appended
    /// - `Ok(false)`: The record was a duplicate; history is unchanged
    /// - `Err(Error)`: Storage error; history is unchanged
    async fn insert_if_distinct(&self, record: AddressRecord) -> Result<bool, crate::Error>;

    /// The most recent record for a family
    ///
    /// # Returns
    ///
    /// - `Ok(Some(AddressRecord))`: The latest record
    /// - `Ok(None)`: No record for this family yet
    /// - `Err(Error)`: Storage error
    async fn latest(&self, version: IpVersion) -> Result<Option<AddressRecord>, crate::Error>;

    /// Observe the history of a family
    ///
    /// Returns a live stream of the full ordered record sequence for
    /// `version`, oldest first (most recent last). The current snapshot is
    /// yielded immediately on subscribe, and a new snapshot after every
    /// mutation. Never fails; an empty store yields an empty sequence.
    fn observe_history(
        &self,
        version: IpVersion,
    ) -> Pin<Box<dyn Stream<Item = Vec<AddressRecord>> + Send + 'static>>;

    /// Remove every record for every family
    ///
    /// Irreversible. Observers are notified with empty snapshots.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: All records removed
    /// - `Err(Error)`: Storage error
    async fn delete_all(&self) -> Result<(), crate::Error>;

    /// Persist any pending changes
    ///
    /// Some implementations may buffer writes. This ensures all changes are
    /// flushed to persistent storage.
    async fn flush(&self) -> Result<(), crate::Error>;
}
