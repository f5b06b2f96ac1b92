//! Test doubles and common utilities for pipeline contract tests
//!
//! This module provides controllable collaborator implementations that
//! verify the pipeline's behavioral contracts without real network or disk
//! I/O.

#![allow(dead_code)]

use findmyip_core::config::PipelineConfig;
use findmyip_core::error::{Error, Result};
use findmyip_core::traits::{Address, AddressRecord, AddressSource, AddressStore, IpVersion};

use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::{Stream, StreamExt, wrappers::WatchStream};

/// A controlled AddressSource driven entirely by the test
///
/// Lookup outcomes are scripted with `push_refresh`; both `refresh` and an
/// auto-fetch subscription consume the script in order. `emit` publishes a
/// value on the observed stream directly, simulating a lookup completing
/// out of band.
pub struct MockAddressSource {
    version: IpVersion,
    refresh_results: Mutex<VecDeque<Result<Address>>>,
    refresh_call_count: AtomicUsize,
    observe_call_count: AtomicUsize,
    current_tx: watch::Sender<Option<Address>>,
}

impl MockAddressSource {
    pub fn new(version: IpVersion) -> Arc<Self> {
        Arc::new(Self {
            version,
            refresh_results: Mutex::new(VecDeque::new()),
            refresh_call_count: AtomicUsize::new(0),
            observe_call_count: AtomicUsize::new(0),
            current_tx: watch::channel(None).0,
        })
    }

    /// Script the outcome of the next lookup
    pub fn push_refresh(&self, result: Result<Address>) {
        self.refresh_results.lock().unwrap().push_back(result);
    }

    /// Script a successful lookup of `ip`
    pub fn push_refresh_ok(&self, ip: &str) {
        self.push_refresh(Ok(Address::new(ip, self.version)));
    }

    /// Publish a value on the observed stream without a lookup
    pub fn emit(&self, current: Option<Address>) {
        self.current_tx.send_replace(current);
    }

    /// Number of lookups performed (explicit refresh + auto-fetch)
    pub fn refresh_call_count(&self) -> usize {
        self.refresh_call_count.load(Ordering::SeqCst)
    }

    /// Number of times observe_current() was called
    pub fn observe_call_count(&self) -> usize {
        self.observe_call_count.load(Ordering::SeqCst)
    }

    fn pop_scripted(&self) -> Result<Address> {
        self.refresh_call_count.fetch_add(1, Ordering::SeqCst);
        self.refresh_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::lookup("no scripted lookup result")))
    }
}

#[async_trait::async_trait]
impl AddressSource for MockAddressSource {
    async fn refresh(&self) -> Result<Address> {
        let result = self.pop_scripted();
        match &result {
            Ok(address) => {
                self.current_tx.send_replace(Some(address.clone()));
            }
            Err(_) => {
                self.current_tx.send_replace(None);
            }
        }
        result
    }

    fn observe_current(
        &self,
        auto_fetch: bool,
    ) -> Pin<Box<dyn Stream<Item = Option<Address>> + Send + 'static>> {
        self.observe_call_count.fetch_add(1, Ordering::SeqCst);

        if auto_fetch {
            match self.pop_scripted() {
                Ok(address) => {
                    self.current_tx.send_replace(Some(address));
                }
                Err(_) => {
                    self.current_tx.send_replace(None);
                }
            }
        }

        Box::pin(WatchStream::new(self.current_tx.subscribe()))
    }

    fn version(&self) -> IpVersion {
        self.version
    }
}

/// An AddressStore whose writes always fail
///
/// Used to verify that storage failures surface as errors instead of
/// panics or silently dropped writes.
pub struct FailingStore {
    history_tx: watch::Sender<Vec<AddressRecord>>,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            history_tx: watch::channel(Vec::new()).0,
        })
    }
}

#[async_trait::async_trait]
impl AddressStore for FailingStore {
    async fn insert_if_distinct(&self, _record: AddressRecord) -> Result<bool> {
        Err(Error::store("injected store failure"))
    }

    async fn latest(&self, _version: IpVersion) -> Result<Option<AddressRecord>> {
        Ok(None)
    }

    fn observe_history(
        &self,
        _version: IpVersion,
    ) -> Pin<Box<dyn Stream<Item = Vec<AddressRecord>> + Send + 'static>> {
        Box::pin(WatchStream::new(self.history_tx.subscribe()))
    }

    async fn delete_all(&self) -> Result<()> {
        Err(Error::store("injected store failure"))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Build a record with a deterministic timestamp
pub fn record_at(ip: &str, version: IpVersion, ts_ms: i64) -> AddressRecord {
    AddressRecord::at(ip, version, Utc.timestamp_millis_opt(ts_ms).unwrap())
}

/// Pipeline config with a test-sized keep-warm window
pub fn pipeline_config(grace_ms: u64) -> PipelineConfig {
    PipelineConfig {
        resubscribe_grace_ms: grace_ms,
    }
}

/// Next stream item, failing the test if nothing arrives in time
pub async fn next_item<S>(stream: &mut S) -> S::Item
where
    S: Stream + Unpin,
{
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("timed out waiting for stream item")
        .expect("stream ended unexpectedly")
}

/// Skip forward until an item satisfies the predicate
pub async fn wait_for<S, F>(stream: &mut S, mut predicate: F) -> S::Item
where
    S: Stream + Unpin,
    F: FnMut(&S::Item) -> bool,
{
    for _ in 0..16 {
        let item = next_item(stream).await;
        if predicate(&item) {
            return item;
        }
    }
    panic!("no stream item satisfied the predicate");
}
