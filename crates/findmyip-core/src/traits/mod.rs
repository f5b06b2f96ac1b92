//! Core traits for the address history system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`AddressSource`]: Determine the device's current public address
//! - [`AddressStore`]: Durable, queryable log of observed addresses
//! - [`PreferencesStore`]: Externally owned enablement flags

pub mod address_source;
pub mod address_store;
pub mod preferences;

pub use address_source::{Address, AddressSource, IpVersion};
pub use address_store::{AddressRecord, AddressStore};
pub use preferences::{PreferenceKey, PreferencesStore};
