//! Configuration types for the address history system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// IPv4 lookup source configuration
    pub ipv4_source: SourceConfig,

    /// IPv6 lookup source configuration
    pub ipv6_source: SourceConfig,

    /// Address store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Optional pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.ipv4_source.validate()?;
        self.ipv6_source.validate()?;
        self.store.validate()?;
        Ok(())
    }
}

/// Address lookup source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// HTTP-based lookup (external "what is my IP" service)
    Http {
        /// URL returning the caller's address as plain text
        url: String,
        /// Request timeout in seconds
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

impl SourceConfig {
    /// Validate the source configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            SourceConfig::Http { url, timeout_secs } => {
                if url.is_empty() {
                    return Err(crate::Error::config("HTTP lookup URL cannot be empty"));
                }
                if !url.starts_with("https://") && !url.starts_with("http://") {
                    return Err(crate::Error::config(format!(
                        "HTTP lookup URL must use http or https scheme, got: {url}"
                    )));
                }
                if *timeout_secs == 0 {
                    return Err(crate::Error::config("HTTP lookup timeout must be > 0"));
                }
                Ok(())
            }
        }
    }
}

/// Address store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// File-based store
    File {
        /// Path to the history file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,
}

impl StoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { path } => {
                if path.is_empty() {
                    return Err(crate::Error::config("store file path cannot be empty"));
                }
                Ok(())
            }
            StoreConfig::Memory => Ok(()),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How long a shared observation stays warm after its last subscriber
    /// detaches (in milliseconds)
    ///
    /// Rapid resubscription within this window reuses the live upstream
    /// subscription instead of tearing it down and re-issuing a refresh.
    /// This absorbs refresh storms from quickly recomposing consumers.
    ///
    /// Set to 0 to tear down immediately on last unsubscribe.
    #[serde(default = "default_resubscribe_grace_ms")]
    pub resubscribe_grace_ms: u64,
}

impl PipelineConfig {
    /// The grace window as a `Duration`
    pub fn resubscribe_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.resubscribe_grace_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resubscribe_grace_ms: default_resubscribe_grace_ms(),
        }
    }
}

fn default_resubscribe_grace_ms() -> u64 {
    2000
}

fn default_timeout_secs() -> u64 {
    10
}
