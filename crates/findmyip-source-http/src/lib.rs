// # HTTP Address Source
//
// This crate provides an HTTP-based address source for the findmyip
// pipeline.
//
// ## Purpose
//
// Determines the device's public-facing address by asking an external
// "what is my IP" service (e.g. api.ipify.org) that echoes the caller's
// address as plain text. One source instance resolves one IP family; a
// dual-stack deployment runs two instances against family-specific
// endpoints.
//
// ## Fetch policy
//
// There is no polling timer. A lookup happens on an explicit `refresh()`
// and when an observer subscribes with auto-fetch; the observation
// lifecycle drives the traffic.

use findmyip_core::config::SourceConfig;
use findmyip_core::traits::{Address, AddressSource, IpVersion};
use findmyip_core::{Error, Result};

use std::net::IpAddr;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::watch;
use tokio_stream::{Stream, wrappers::WatchStream};

/// Default request timeout for lookup services
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Well-known lookup services (for reference configurations)
pub const DEFAULT_IPV4_SERVICE: &str = "https://api.ipify.org";
pub const DEFAULT_IPV6_SERVICE: &str = "https://api6.ipify.org";

/// HTTP-based public address source
///
/// Fetches the caller's address from a plain-text echo service, validates
/// that it parses as an address of the configured family, and publishes the
/// latest outcome on a `watch` channel: `Some(address)` after a successful
/// lookup, `None` initially and after a failed one.
pub struct HttpAddressSource {
    /// URL of the lookup service
    url: String,

    /// IP family this source resolves
    version: IpVersion,

    /// Latest lookup outcome, shared with every observer
    current_tx: watch::Sender<Option<Address>>,

    /// HTTP client
    client: reqwest::Client,
}

impl HttpAddressSource {
    /// Create a new HTTP address source
    ///
    /// # Parameters
    ///
    /// - `url`: URL returning the caller's address as plain text
    /// - `version`: IP family this source resolves
    pub fn new(url: impl Into<String>, version: IpVersion) -> Self {
        Self::with_timeout(url, version, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create with a custom request timeout
    pub fn with_timeout(url: impl Into<String>, version: IpVersion, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            version,
            current_tx: watch::channel(None).0,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Create from a core source configuration
    pub fn from_config(config: &SourceConfig, version: IpVersion) -> Result<Self> {
        config.validate()?;
        match config {
            SourceConfig::Http { url, timeout_secs } => Ok(Self::with_timeout(
                url.clone(),
                version,
                Duration::from_secs(*timeout_secs),
            )),
        }
    }
}

/// Perform one lookup against the service
async fn fetch_once(client: &reqwest::Client, url: &str, version: IpVersion) -> Result<Address> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::http(format!("request to {} failed: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(Error::http(format!("{} answered {}", url, response.status())));
    }

    let body = response
        .text()
        .await
        .map_err(|e| Error::http(format!("failed to read response: {}", e)))?;

    parse_address(&body, version)
}

/// Record a lookup outcome on the observed stream
fn publish(tx: &watch::Sender<Option<Address>>, version: IpVersion, outcome: &Result<Address>) {
    match outcome {
        Ok(address) => {
            tx.send_replace(Some(address.clone()));
        }
        Err(e) => {
            tracing::warn!("{} lookup failed: {}", version, e);
            tx.send_replace(None);
        }
    }
}

/// Parse a lookup service response into an address of the expected family
fn parse_address(body: &str, version: IpVersion) -> Result<Address> {
    let text = body.trim();

    let ip: IpAddr = text
        .parse()
        .map_err(|_| Error::lookup(format!("invalid address in response: {:?}", text)))?;

    let matches_family = match version {
        IpVersion::V4 => ip.is_ipv4(),
        IpVersion::V6 => ip.is_ipv6(),
    };
    if !matches_family {
        return Err(Error::lookup(format!("expected {}, got: {}", version, ip)));
    }

    Ok(Address::new(text, version))
}

#[async_trait::async_trait]
impl AddressSource for HttpAddressSource {
    async fn refresh(&self) -> Result<Address> {
        let outcome = fetch_once(&self.client, &self.url, self.version).await;
        publish(&self.current_tx, self.version, &outcome);
        outcome
    }

    fn observe_current(
        &self,
        auto_fetch: bool,
    ) -> Pin<Box<dyn Stream<Item = Option<Address>> + Send + 'static>> {
        let rx = self.current_tx.subscribe();

        if auto_fetch {
            let url = self.url.clone();
            let version = self.version;
            let client = self.client.clone();
            let tx = self.current_tx.clone();

            tokio::spawn(async move {
                tracing::debug!("auto-fetching {} address from {}", version, url);
                let outcome = fetch_once(&client, &url, version).await;
                publish(&tx, version, &outcome);
            });
        }

        Box::pin(WatchStream::new(rx))
    }

    fn version(&self) -> IpVersion {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trimmed_ipv4_response() {
        let address = parse_address("198.51.100.7\n", IpVersion::V4).unwrap();
        assert_eq!(address.ip, "198.51.100.7");
        assert_eq!(address.version, IpVersion::V4);
    }

    #[test]
    fn parses_ipv6_response() {
        let address = parse_address("2001:db8::1", IpVersion::V6).unwrap();
        assert_eq!(address.ip, "2001:db8::1");
    }

    #[test]
    fn rejects_family_mismatch() {
        assert!(parse_address("2001:db8::1", IpVersion::V4).is_err());
        assert!(parse_address("198.51.100.7", IpVersion::V6).is_err());
    }

    #[test]
    fn rejects_garbage_response() {
        assert!(parse_address("<html>not an ip</html>", IpVersion::V4).is_err());
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let config = SourceConfig::Http {
            url: String::new(),
            timeout_secs: 10,
        };
        assert!(HttpAddressSource::from_config(&config, IpVersion::V4).is_err());
    }

    #[test]
    fn from_config_builds_source_for_family() {
        let config = SourceConfig::Http {
            url: DEFAULT_IPV6_SERVICE.to_string(),
            timeout_secs: 5,
        };
        let source = HttpAddressSource::from_config(&config, IpVersion::V6).unwrap();
        assert_eq!(source.version(), IpVersion::V6);
    }
}
