// # Preferences Trait
//
// Contract for the externally owned settings component, consumed by the
// pipeline as three boolean-valued keys. The settings UI that writes these
// values lives outside this library; all the pipeline needs is a live view
// of each flag.

use std::pin::Pin;
use tokio_stream::Stream;

/// The preference keys the pipeline observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreferenceKey {
    /// Global save-history toggle ("has permission" projection)
    SaveHistory,
    /// IPv4 tracking enabled
    Ipv4Enabled,
    /// IPv6 tracking enabled
    Ipv6Enabled,
}

impl PreferenceKey {
    pub(crate) fn slot(self) -> usize {
        match self {
            PreferenceKey::SaveHistory => 0,
            PreferenceKey::Ipv4Enabled => 1,
            PreferenceKey::Ipv6Enabled => 2,
        }
    }
}

/// Trait for preference store implementations
///
/// `observe` returns a live sequence of the key's value, `None` when the
/// key has never been set. The current value is yielded immediately on
/// subscribe, then again after every change.
pub trait PreferencesStore: Send + Sync {
    fn observe(
        &self,
        key: PreferenceKey,
    ) -> Pin<Box<dyn Stream<Item = Option<bool>> + Send + 'static>>;
}
