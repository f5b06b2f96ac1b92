// # findmyip-core
//
// Core library for the public address history pipeline.
//
// ## Architecture Overview
//
// This library determines the device's public-facing network addresses,
// keeps a durable history of the observed values, and projects that history
// into presentation-ready state:
//
// - **AddressSource**: Trait for looking up the current public address of
//   one IP family (remote lookup, may fail)
// - **AddressStore**: Trait for the durable, append-mostly log of observed
//   addresses with live per-family queries
// - **PreferencesStore**: Trait for the externally owned enablement flags
// - **AddressHistoryPipeline**: Binds the three together — refresh results
//   flow into the store, the store's live query feeds every observer
//
// ## Design Principles
//
// 1. **Single write path**: All appends go through the store's atomic
//    conditional insert; there is no other way to mutate history
// 2. **Store as source of truth**: Observers (including "current address")
//    derive from the store's live query, not from in-flight lookup state
// 3. **Event-Driven**: Live sequences are async streams; refresh is driven
//    by subscription lifecycle, not by timers
// 4. **Library-First**: The daemon is a thin wiring layer over this crate

pub mod config;
pub mod error;
pub mod pipeline;
pub mod prefs;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use config::{AppConfig, PipelineConfig, SourceConfig, StoreConfig};
pub use error::{Error, Result};
pub use pipeline::{AddressHistoryPipeline, HistoryEntry, HistoryState};
pub use prefs::MemoryPreferences;
pub use store::{FileAddressStore, MemoryAddressStore};
pub use traits::{
    Address, AddressRecord, AddressSource, AddressStore, IpVersion, PreferenceKey,
    PreferencesStore,
};
