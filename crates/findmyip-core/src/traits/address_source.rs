// # Address Source Trait
//
// Defines the interface for determining the device's current public address.
//
// ## Implementations
//
// - HTTP-based (remote "what is my IP" service): `findmyip-source-http` crate
// - Future: DNS-based (OpenDNS/Google resolver), STUN
//
// ## Usage
//
// ```rust,ignore
// use findmyip_core::AddressSource;
// use tokio_stream::StreamExt;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* AddressSource implementation */;
//
//     // Explicit one-shot lookup
//     let address = source.refresh().await?;
//
//     // Observe the current address; subscribing triggers a fetch
//     let mut stream = source.observe_current(true);
//     while let Some(current) = stream.next().await {
//         println!("current address: {:?}", current);
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// IP family of an observed address
///
/// The two families are tracked independently: separate sources, separate
/// history sequences, separate enablement flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Both families, in a fixed order (used for per-family channel slots)
    pub const ALL: [IpVersion; 2] = [IpVersion::V4, IpVersion::V6];

    /// Stable index for per-family storage slots
    pub(crate) fn slot(self) -> usize {
        match self {
            IpVersion::V4 => 0,
            IpVersion::V6 => 1,
        }
    }
}

impl std::fmt::Display for IpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "IPv4"),
            IpVersion::V6 => write!(f, "IPv6"),
        }
    }
}

/// A public address as reported by a lookup service
///
/// The ip is carried in its textual form. Sources are expected to emit only
/// values that parse as an address of their family; downstream layers do not
/// re-validate the format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Textual representation of the address
    pub ip: String,
    /// Which IP family this address belongs to
    pub version: IpVersion,
}

impl Address {
    pub fn new(ip: impl Into<String>, version: IpVersion) -> Self {
        Self {
            ip: ip.into(),
            version,
        }
    }
}

/// Trait for public address lookup implementations
///
/// One source resolves exactly one IP family. Implementations must be
/// thread-safe and usable across async tasks.
///
/// Sources are observers, not decision-makers: they perform the lookup I/O
/// and report results, but never touch the address store and never decide
/// what gets persisted.
#[async_trait]
pub trait AddressSource: Send + Sync {
    /// Perform an explicit, on-demand, single-shot lookup
    ///
    /// A successful result is also published on the stream returned by
    /// [`observe_current`](AddressSource::observe_current). A failed lookup
    /// publishes an absent value there and returns the error here.
    ///
    /// # Returns
    ///
    /// - `Ok(Address)`: The current public address
    /// - `Err(Error)`: The lookup failed or timed out
    async fn refresh(&self) -> Result<Address, crate::Error>;

    /// Observe the current address
    ///
    /// Returns a stream that yields the latest known address, or `None` when
    /// no lookup has succeeded yet or the last lookup failed.
    ///
    /// # Behavior
    ///
    /// - Yields the current value immediately when first polled
    /// - Yields again whenever a lookup completes with a different outcome
    /// - With `auto_fetch`, subscribing issues an active refresh; its result
    ///   arrives on this stream
    /// - Must be cancellation-safe (dropping the stream cleans up resources)
    fn observe_current(
        &self,
        auto_fetch: bool,
    ) -> Pin<Box<dyn Stream<Item = Option<Address>> + Send + 'static>>;

    /// The IP family this source resolves
    fn version(&self) -> IpVersion;
}
