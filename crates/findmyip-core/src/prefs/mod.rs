// # Preference Store Implementation
//
// In-memory, watch-backed implementation of PreferencesStore.
//
// The settings surface that owns these values is outside this library; this
// implementation is the wiring target for embedders (seeded from whatever
// configuration mechanism they have) and the test double for the pipeline
// contract tests.

use std::pin::Pin;
use tokio::sync::watch;
use tokio_stream::{Stream, wrappers::WatchStream};

use crate::traits::{PreferenceKey, PreferencesStore};

/// In-memory preference store
///
/// Each key is one `watch` channel of `Option<bool>`; a key that has never
/// been set observes as `None`. Cloning shares the underlying channels, so
/// a settings owner can keep one handle and hand another to the pipeline.
#[derive(Debug, Clone)]
pub struct MemoryPreferences {
    channels: [watch::Sender<Option<bool>>; 3],
}

impl MemoryPreferences {
    /// Create a preference store with every key unset
    pub fn new() -> Self {
        Self {
            channels: [
                watch::channel(None).0,
                watch::channel(None).0,
                watch::channel(None).0,
            ],
        }
    }

    /// Set a key, notifying all observers
    pub fn set(&self, key: PreferenceKey, value: bool) {
        self.channels[key.slot()].send_replace(Some(value));
    }

    /// Current value of a key
    pub fn get(&self, key: PreferenceKey) -> Option<bool> {
        *self.channels[key.slot()].borrow()
    }
}

impl Default for MemoryPreferences {
    fn default() -> Self {
        Self::new()
    }
}

impl PreferencesStore for MemoryPreferences {
    fn observe(
        &self,
        key: PreferenceKey,
    ) -> Pin<Box<dyn Stream<Item = Option<bool>> + Send + 'static>> {
        Box::pin(WatchStream::new(self.channels[key.slot()].subscribe()))
    }
}
