// # Address Store Implementations
//
// This module provides implementations of the AddressStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::FileAddressStore;
pub use memory::MemoryAddressStore;

use std::pin::Pin;
use tokio::sync::watch;
use tokio_stream::{Stream, wrappers::WatchStream};

use crate::traits::{AddressRecord, IpVersion};

/// Per-family live-query channels shared by the store implementations
///
/// Each family gets one `watch` channel carrying the full ordered snapshot.
/// Subscribers receive the current snapshot immediately and a new one after
/// every mutation. Publishing never blocks and never fails, with or without
/// live subscribers.
#[derive(Debug)]
pub(crate) struct HistoryWatch {
    channels: [watch::Sender<Vec<AddressRecord>>; 2],
}

impl HistoryWatch {
    pub(crate) fn new() -> Self {
        Self {
            channels: [watch::channel(Vec::new()).0, watch::channel(Vec::new()).0],
        }
    }

    /// Replace the published snapshot for a family
    ///
    /// Callers publish while still holding the store's write lock so that
    /// snapshots arrive at observers in mutation order.
    pub(crate) fn publish(&self, version: IpVersion, snapshot: Vec<AddressRecord>) {
        self.channels[version.slot()].send_replace(snapshot);
    }

    pub(crate) fn observe(
        &self,
        version: IpVersion,
    ) -> Pin<Box<dyn Stream<Item = Vec<AddressRecord>> + Send + 'static>> {
        Box::pin(WatchStream::new(self.channels[version.slot()].subscribe()))
    }
}

/// Distinctness rule shared by the store implementations
///
/// A record is inserted only when no latest record exists or the latest ip
/// differs, and never when its timestamp equals the latest record's
/// timestamp (duplicate-fire refreshes at the same instant stay no-ops).
pub(crate) fn is_distinct(latest: Option<&AddressRecord>, record: &AddressRecord) -> bool {
    match latest {
        None => true,
        Some(latest) => {
            latest.ip != record.ip && latest.timestamp_ms() != record.timestamp_ms()
        }
    }
}
