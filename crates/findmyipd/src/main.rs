// # findmyipd - Address History Daemon
//
// Thin integration layer over findmyip-core. The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing the runtime and tracing
// 3. Wiring the HTTP sources, the store and the preference flags into the
//    pipeline
// 4. Logging current-address and history-state changes until shutdown
//
// All pipeline logic lives in findmyip-core; nothing here decides what gets
// persisted.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Lookup services
// - `FINDMYIP_IPV4_URL`: IPv4 echo service (default: https://api.ipify.org)
// - `FINDMYIP_IPV6_URL`: IPv6 echo service (default: https://api6.ipify.org)
// - `FINDMYIP_HTTP_TIMEOUT_SECS`: Request timeout in seconds
//
// ### Store
// - `FINDMYIP_STORE_TYPE`: Type of address store (file, memory)
// - `FINDMYIP_STORE_PATH`: Path to history file (for file store)
//
// ### Flags
// - `FINDMYIP_SAVE_HISTORY`: Save-history permission (default: false)
// - `FINDMYIP_IPV4_ENABLED`: Track IPv4 (default: true)
// - `FINDMYIP_IPV6_ENABLED`: Track IPv6 (default: true)
//
// ### Pipeline
// - `FINDMYIP_RESUBSCRIBE_GRACE_MS`: Keep-warm window after last unsubscribe
// - `FINDMYIP_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export FINDMYIP_STORE_TYPE=file
// export FINDMYIP_STORE_PATH=/var/lib/findmyip/history.json
// export FINDMYIP_IPV6_ENABLED=false
//
// findmyipd
// ```

use anyhow::Result;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use findmyip_core::{
    AddressHistoryPipeline, AddressStore, AppConfig, HistoryState, IpVersion, MemoryAddressStore,
    MemoryPreferences, PipelineConfig, PreferenceKey, SourceConfig, StoreConfig,
};
use findmyip_source_http::{DEFAULT_IPV4_SERVICE, DEFAULT_IPV6_SERVICE, HttpAddressSource};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DaemonExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DaemonExitCode> for ExitCode {
    fn from(code: DaemonExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    ipv4_url: String,
    ipv6_url: String,
    http_timeout_secs: u64,
    store_type: String,
    store_path: Option<String>,
    save_history: bool,
    ipv4_enabled: bool,
    ipv6_enabled: bool,
    resubscribe_grace_ms: u64,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            ipv4_url: env::var("FINDMYIP_IPV4_URL")
                .unwrap_or_else(|_| DEFAULT_IPV4_SERVICE.to_string()),
            ipv6_url: env::var("FINDMYIP_IPV6_URL")
                .unwrap_or_else(|_| DEFAULT_IPV6_SERVICE.to_string()),
            http_timeout_secs: parse_env("FINDMYIP_HTTP_TIMEOUT_SECS", 10)?,
            store_type: env::var("FINDMYIP_STORE_TYPE").unwrap_or_else(|_| "file".to_string()),
            store_path: env::var("FINDMYIP_STORE_PATH").ok(),
            save_history: parse_bool_env("FINDMYIP_SAVE_HISTORY", false)?,
            ipv4_enabled: parse_bool_env("FINDMYIP_IPV4_ENABLED", true)?,
            ipv6_enabled: parse_bool_env("FINDMYIP_IPV6_ENABLED", true)?,
            resubscribe_grace_ms: parse_env("FINDMYIP_RESUBSCRIBE_GRACE_MS", 2000)?,
            log_level: env::var("FINDMYIP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("FINDMYIP_IPV4_URL", &self.ipv4_url),
            ("FINDMYIP_IPV6_URL", &self.ipv6_url),
        ] {
            if url.is_empty() {
                anyhow::bail!("{name} cannot be empty");
            }
            if !url.starts_with("https://") && !url.starts_with("http://") {
                anyhow::bail!("{name} must use HTTP or HTTPS scheme. Got: {url}");
            }
            if url.starts_with("http://") {
                eprintln!("WARNING: {name} uses HTTP (not HTTPS). Consider using HTTPS.");
            }
        }

        if !(1..=120).contains(&self.http_timeout_secs) {
            anyhow::bail!(
                "FINDMYIP_HTTP_TIMEOUT_SECS must be between 1 and 120 seconds. Got: {}",
                self.http_timeout_secs
            );
        }

        match self.store_type.as_str() {
            "file" | "memory" => {}
            other => anyhow::bail!(
                "FINDMYIP_STORE_TYPE '{other}' is not supported. Supported types: file, memory"
            ),
        }

        if self.store_type == "file" {
            match &self.store_path {
                None => anyhow::bail!(
                    "FINDMYIP_STORE_PATH is required when FINDMYIP_STORE_TYPE=file. \
                    Set it via: export FINDMYIP_STORE_PATH=/var/lib/findmyip/history.json"
                ),
                Some(path) if path.is_empty() => {
                    anyhow::bail!("FINDMYIP_STORE_PATH cannot be empty")
                }
                Some(_) => {}
            }
        }

        if !self.ipv4_enabled && !self.ipv6_enabled {
            anyhow::bail!(
                "Both families are disabled; enable at least one of \
                FINDMYIP_IPV4_ENABLED / FINDMYIP_IPV6_ENABLED"
            );
        }

        if self.resubscribe_grace_ms > 60_000 {
            anyhow::bail!(
                "FINDMYIP_RESUBSCRIBE_GRACE_MS must be at most 60000. Got: {}",
                self.resubscribe_grace_ms
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!(
                "FINDMYIP_LOG_LEVEL '{other}' is not valid. \
                Valid levels: trace, debug, info, warn, error"
            ),
        }

        Ok(())
    }

    /// Core configuration derived from the environment
    fn app_config(&self) -> AppConfig {
        AppConfig {
            ipv4_source: SourceConfig::Http {
                url: self.ipv4_url.clone(),
                timeout_secs: self.http_timeout_secs,
            },
            ipv6_source: SourceConfig::Http {
                url: self.ipv6_url.clone(),
                timeout_secs: self.http_timeout_secs,
            },
            store: match &self.store_path {
                Some(path) if self.store_type == "file" => StoreConfig::File { path: path.clone() },
                _ => StoreConfig::Memory,
            },
            pipeline: PipelineConfig {
                resubscribe_grace_ms: self.resubscribe_grace_ms,
            },
        }
    }
}

/// Parse a numeric environment variable with a default
fn parse_env(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("{name} must be a number. Got: {value}")),
        Err(_) => Ok(default),
    }
}

/// Parse a boolean environment variable with a default
fn parse_bool_env(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => anyhow::bail!("{name} must be a boolean. Got: {other}"),
        },
        Err(_) => Ok(default),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DaemonExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return DaemonExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DaemonExitCode::ConfigError.into();
    }

    info!("Starting findmyipd daemon");

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DaemonExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {}", e);
            DaemonExitCode::RuntimeError
        } else {
            DaemonExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let app_config = config.app_config();
    app_config.validate()?;

    // Lookup sources, one per family
    let ipv4_source = Arc::new(HttpAddressSource::from_config(
        &app_config.ipv4_source,
        IpVersion::V4,
    )?);
    let ipv6_source = Arc::new(HttpAddressSource::from_config(
        &app_config.ipv6_source,
        IpVersion::V6,
    )?);

    // Address store
    let store: Arc<dyn AddressStore> = match &app_config.store {
        StoreConfig::File { path } => {
            info!("Using file store at {}", path);
            Arc::new(findmyip_core::FileAddressStore::new(path).await?)
        }
        StoreConfig::Memory => {
            info!("Using in-memory store (history is lost on exit)");
            Arc::new(MemoryAddressStore::new())
        }
    };

    // Preference flags, seeded from the environment
    let preferences = Arc::new(MemoryPreferences::new());
    preferences.set(PreferenceKey::SaveHistory, config.save_history);
    preferences.set(PreferenceKey::Ipv4Enabled, config.ipv4_enabled);
    preferences.set(PreferenceKey::Ipv6Enabled, config.ipv6_enabled);

    let pipeline = Arc::new(AddressHistoryPipeline::new(
        ipv4_source,
        ipv6_source,
        Arc::clone(&store),
        preferences,
        app_config.pipeline.clone(),
    ));

    // Observe each enabled family; subscribing triggers the initial refresh
    let mut watchers = Vec::new();
    let enabled = [
        (IpVersion::V4, config.ipv4_enabled),
        (IpVersion::V6, config.ipv6_enabled),
    ];
    for (version, enabled) in enabled {
        if !enabled {
            info!("{} tracking disabled", version);
            continue;
        }
        watchers.push(tokio::spawn(watch_family(Arc::clone(&pipeline), version)));
    }

    info!("Daemon initialized, monitoring public addresses");

    // Wait for shutdown signal
    let signal_name = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal_name);

    // Detach observers, then make sure pending history reaches disk
    for watcher in watchers {
        watcher.abort();
    }
    store.flush().await?;
    info!("History flushed, daemon stopped");

    Ok(())
}

/// Log current-address and history-state changes for one family
async fn watch_family(pipeline: Arc<AddressHistoryPipeline>, version: IpVersion) {
    let mut current = pipeline.observe_current_address(version);
    let mut states = pipeline.observe_history_state(version);

    loop {
        tokio::select! {
            item = current.next() => match item {
                Some(Some(address)) => info!("current {} address: {}", version, address.ip),
                Some(None) => warn!("{} address unknown (lookup pending or failed)", version),
                None => break,
            },
            item = states.next() => match item {
                Some(HistoryState::Loading) => {}
                Some(HistoryState::Disabled) => info!("{} history view disabled", version),
                Some(HistoryState::Loaded(entries)) => {
                    info!("{} history: {} entries", version, entries.len());
                }
                None => break,
            },
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            ipv4_url: DEFAULT_IPV4_SERVICE.to_string(),
            ipv6_url: DEFAULT_IPV6_SERVICE.to_string(),
            http_timeout_secs: 10,
            store_type: "memory".to_string(),
            store_path: None,
            save_history: false,
            ipv4_enabled: true,
            ipv6_enabled: true,
            resubscribe_grace_ms: 2000,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn file_store_requires_path() {
        let mut config = base_config();
        config.store_type = "file".to_string();
        config.store_path = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_store_type() {
        let mut config = base_config();
        config.store_type = "redis".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_disabling_both_families() {
        let mut config = base_config();
        config.ipv4_enabled = false;
        config.ipv6_enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_http_url() {
        let mut config = base_config();
        config.ipv4_url = "ftp://api.ipify.org".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn memory_store_config_ignores_path() {
        let config = base_config();
        assert!(matches!(config.app_config().store, StoreConfig::Memory));
    }
}
