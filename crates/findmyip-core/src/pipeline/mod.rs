//! Address history pipeline
//!
//! The pipeline composes the three collaborators — address sources, the
//! address store, and the preference store — into the live views the rest
//! of the application consumes. It owns no state of its own beyond the
//! shared subscriptions; the store's live query is the single source of
//! truth for history and for "current address" (the most recent entry).
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐  refresh / auto-fetch   ┌──────────────────────┐
//! │ AddressSource │────── Address ─────────▶│                      │
//! └───────────────┘                         │ AddressHistory       │
//! ┌───────────────┐  enablement flags       │ Pipeline             │
//! │ Preferences   │────── Option<bool> ────▶│                      │
//! └───────────────┘                         └──────────┬───────────┘
//!                                                      │ insert_if_distinct
//!                                                      ▼
//!                                           ┌──────────────────────┐
//!                                           │ AddressStore         │
//!                                           │ (live history query) │
//!                                           └──────────────────────┘
//! ```
//!
//! ## Event Flow
//!
//! 1. A subscriber observes the current address; the source auto-fetches
//! 2. Every successful lookup result goes through the store's conditional
//!    insert (the only write path)
//! 3. The store re-emits the updated history to every live observer
//! 4. History state projections combine the history with the enablement
//!    flags into `Loading | Disabled | Loaded`

mod share;

use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, trace};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::traits::{
    Address, AddressRecord, AddressSource, AddressStore, IpVersion, PreferenceKey,
    PreferencesStore,
};
use share::SharedWatch;

/// One row of the presentation-ready history view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Textual address
    pub ip: String,
    /// Formatted observation date (UTC)
    pub observed_at: String,
}

impl From<&AddressRecord> for HistoryEntry {
    fn from(record: &AddressRecord) -> Self {
        Self {
            ip: record.ip.clone(),
            observed_at: record.observed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Per-family history projection
///
/// `Loading` is the initial value, emitted once before the first combined
/// flag + history emission; it is never re-entered while the shared
/// subscription stays warm. `Disabled` and `Loaded` are mutually reachable:
/// flipping the family's enable flag moves between them without touching
/// the underlying records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryState {
    Loading,
    Disabled,
    Loaded(Vec<HistoryEntry>),
}

/// Composition layer over sources, store and preferences
///
/// All observations handed out by the pipeline are shared per family and
/// stay warm for the configured grace window after the last subscriber
/// detaches, so rapid resubscription neither re-issues a refresh nor
/// rebuilds the combine state. A lookup result that arrives after every
/// observer detached is never delivered to them.
///
/// ## Threading
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Subscribing
/// requires a Tokio runtime.
pub struct AddressHistoryPipeline {
    sources: [Arc<dyn AddressSource>; 2],
    store: Arc<dyn AddressStore>,
    current: [SharedWatch<Option<Address>>; 2],
    history_state: [SharedWatch<HistoryState>; 2],
    permission: SharedWatch<bool>,
}

impl AddressHistoryPipeline {
    /// Create a new pipeline
    ///
    /// # Parameters
    ///
    /// - `ipv4_source` / `ipv6_source`: Lookup implementations, one per family
    /// - `store`: Address store implementation
    /// - `preferences`: Externally owned enablement flags
    /// - `config`: Pipeline settings (keep-warm grace window)
    pub fn new(
        ipv4_source: Arc<dyn AddressSource>,
        ipv6_source: Arc<dyn AddressSource>,
        store: Arc<dyn AddressStore>,
        preferences: Arc<dyn PreferencesStore>,
        config: PipelineConfig,
    ) -> Self {
        debug_assert_eq!(ipv4_source.version(), IpVersion::V4);
        debug_assert_eq!(ipv6_source.version(), IpVersion::V6);

        let grace = config.resubscribe_grace();
        let sources = [ipv4_source, ipv6_source];

        let current = IpVersion::ALL.map(|version| {
            SharedWatch::new(
                None,
                grace,
                current_producer(Arc::clone(&sources[version.slot()]), Arc::clone(&store)),
            )
        });

        let history_state = IpVersion::ALL.map(|version| {
            SharedWatch::new(
                HistoryState::Loading,
                grace,
                state_producer(Arc::clone(&store), Arc::clone(&preferences), version),
            )
        });

        let permission = SharedWatch::new(
            false,
            grace,
            permission_producer(Arc::clone(&preferences)),
        );

        Self {
            sources,
            store,
            current,
            history_state,
            permission,
        }
    }

    /// Observe the current address of a family
    ///
    /// Subscribing triggers an active refresh through the source
    /// (`auto_fetch`); every successful result is conditionally inserted
    /// into the store before being delivered. `None` means no lookup has
    /// succeeded yet or the last one failed — the last-known history entry
    /// remains the value to show in that case.
    pub fn observe_current_address(
        &self,
        version: IpVersion,
    ) -> Pin<Box<dyn Stream<Item = Option<Address>> + Send>> {
        Box::pin(self.current[version.slot()].subscribe())
    }

    /// Explicit, on-demand refresh of a family's address
    ///
    /// On success the result is conditionally inserted into the store; a
    /// storage failure propagates. On lookup failure history is untouched
    /// and the error propagates.
    pub async fn refresh_current_address(&self, version: IpVersion) -> Result<Address> {
        let address = self.sources[version.slot()].refresh().await?;
        let record = AddressRecord::new(address.ip.clone(), address.version);
        self.store.insert_if_distinct(record).await?;
        Ok(address)
    }

    /// Observe the presentation state of a family's history
    ///
    /// Emits `Loading` first, then `Disabled` whenever the family's enable
    /// flag is not set to true, else `Loaded` with the full ordered history
    /// (oldest first). Flag flips move between `Disabled` and `Loaded`
    /// without losing records.
    pub fn observe_history_state(
        &self,
        version: IpVersion,
    ) -> Pin<Box<dyn Stream<Item = HistoryState> + Send>> {
        Box::pin(self.history_state[version.slot()].subscribe())
    }

    /// Observe the save-history permission projection
    ///
    /// True only while the global save-history flag is set. This gates what
    /// presentation layers show, not whether observed addresses keep being
    /// appended to the store.
    pub fn observe_save_history_permission(&self) -> Pin<Box<dyn Stream<Item = bool> + Send>> {
        Box::pin(self.permission.subscribe())
    }

    /// Remove the entire address history
    pub async fn delete_history(&self) -> Result<()> {
        self.store.delete_all().await
    }
}

/// Append a successful lookup result to the store
///
/// Storage failures are reported, never escalated into a panic of the
/// observation task; the observer still receives the looked-up value and
/// the history keeps its last consistent state.
async fn record_observation(store: &Arc<dyn AddressStore>, address: &Address) {
    let record = AddressRecord::new(address.ip.clone(), address.version);
    match store.insert_if_distinct(record).await {
        Ok(true) => debug!("appended {} history entry: {}", address.version, address.ip),
        Ok(false) => trace!("{} address unchanged: {}", address.version, address.ip),
        Err(e) => error!("failed to persist {} observation: {}", address.version, e),
    }
}

fn current_producer(
    source: Arc<dyn AddressSource>,
    store: Arc<dyn AddressStore>,
) -> impl Fn(watch::Sender<Option<Address>>) -> JoinHandle<()> + Send + Sync + 'static {
    move |tx| {
        let source = Arc::clone(&source);
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut stream = source.observe_current(true);
            while let Some(current) = stream.next().await {
                if let Some(address) = &current {
                    record_observation(&store, address).await;
                }
                tx.send_if_modified(|value| {
                    if *value == current {
                        false
                    } else {
                        *value = current.clone();
                        true
                    }
                });
            }
        })
    }
}

fn state_producer(
    store: Arc<dyn AddressStore>,
    preferences: Arc<dyn PreferencesStore>,
    version: IpVersion,
) -> impl Fn(watch::Sender<HistoryState>) -> JoinHandle<()> + Send + Sync + 'static {
    let key = match version {
        IpVersion::V4 => PreferenceKey::Ipv4Enabled,
        IpVersion::V6 => PreferenceKey::Ipv6Enabled,
    };

    move |tx| {
        let store = Arc::clone(&store);
        let preferences = Arc::clone(&preferences);
        tokio::spawn(async move {
            let mut history = store.observe_history(version);
            let mut enabled = preferences.observe(key);
            let mut latest_history: Option<Vec<AddressRecord>> = None;
            let mut latest_enabled: Option<Option<bool>> = None;

            loop {
                tokio::select! {
                    item = history.next() => match item {
                        Some(records) => latest_history = Some(records),
                        None => break,
                    },
                    item = enabled.next() => match item {
                        Some(flag) => latest_enabled = Some(flag),
                        None => break,
                    },
                }

                // First emission waits until both inputs have produced
                let (Some(records), Some(flag)) = (&latest_history, &latest_enabled) else {
                    continue;
                };

                let state = if *flag != Some(true) {
                    HistoryState::Disabled
                } else {
                    HistoryState::Loaded(records.iter().map(HistoryEntry::from).collect())
                };

                tx.send_if_modified(|value| {
                    if *value == state {
                        false
                    } else {
                        *value = state.clone();
                        true
                    }
                });
            }
        })
    }
}

fn permission_producer(
    preferences: Arc<dyn PreferencesStore>,
) -> impl Fn(watch::Sender<bool>) -> JoinHandle<()> + Send + Sync + 'static {
    move |tx| {
        let preferences = Arc::clone(&preferences);
        tokio::spawn(async move {
            let mut stream = preferences.observe(PreferenceKey::SaveHistory);
            while let Some(value) = stream.next().await {
                let granted = value == Some(true);
                tx.send_if_modified(|current| {
                    if *current == granted {
                        false
                    } else {
                        *current = granted;
                        true
                    }
                });
            }
        })
    }
}
