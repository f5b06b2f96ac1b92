//! Behavioral Contract Test: Refresh → Conditional Insert Flow
//!
//! This test verifies the subscription-driven refresh pipeline:
//! - Subscribing to the current address issues exactly one active refresh
//! - Successful lookups land in the store; failed lookups leave it alone
//! - Racing refresh completions store exactly one record
//! - Detached observers never receive late results; the keep-warm window
//!   absorbs resubscribe storms
//!
//! If this test fails, the observation pipeline is broken.

mod common;

use common::*;
use findmyip_core::error::Error;
use findmyip_core::pipeline::AddressHistoryPipeline;
use findmyip_core::prefs::MemoryPreferences;
use findmyip_core::store::MemoryAddressStore;
use findmyip_core::traits::{Address, AddressStore, IpVersion};
use std::sync::Arc;
use std::time::Duration;

fn pipeline_with(
    v4_source: &Arc<MockAddressSource>,
    store: &Arc<MemoryAddressStore>,
    grace_ms: u64,
) -> AddressHistoryPipeline {
    AddressHistoryPipeline::new(
        v4_source.clone(),
        MockAddressSource::new(IpVersion::V6),
        store.clone(),
        Arc::new(MemoryPreferences::new()),
        pipeline_config(grace_ms),
    )
}

#[tokio::test]
async fn subscribing_triggers_one_refresh_and_persists_result() {
    let source = MockAddressSource::new(IpVersion::V4);
    let store = Arc::new(MemoryAddressStore::new());
    source.push_refresh_ok("198.51.100.7");

    let pipeline = pipeline_with(&source, &store, 50);
    let mut current = pipeline.observe_current_address(IpVersion::V4);

    let address = wait_for(&mut current, |item| item.is_some()).await;
    assert_eq!(address.unwrap().ip, "198.51.100.7");
    assert_eq!(source.refresh_call_count(), 1);
    assert_eq!(source.observe_call_count(), 1);

    // The insert happens before the value reaches the observer
    let latest = store.latest(IpVersion::V4).await.unwrap();
    assert_eq!(latest.unwrap().ip, "198.51.100.7");
}

#[tokio::test]
async fn lookup_failure_leaves_history_untouched() {
    let source = MockAddressSource::new(IpVersion::V4);
    let store = Arc::new(MemoryAddressStore::new());
    // No scripted result: every lookup fails

    let pipeline = pipeline_with(&source, &store, 50);
    let mut current = pipeline.observe_current_address(IpVersion::V4);

    // The stream reports absence instead of crashing
    assert!(next_item(&mut current).await.is_none());
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(source.refresh_call_count(), 1);
    assert!(store.latest(IpVersion::V4).await.unwrap().is_none());
}

#[tokio::test]
async fn explicit_refresh_failure_propagates_without_insert() {
    let source = MockAddressSource::new(IpVersion::V4);
    let store = Arc::new(MemoryAddressStore::new());
    source.push_refresh(Err(Error::lookup("lookup timed out")));

    let pipeline = pipeline_with(&source, &store, 50);
    let result = pipeline.refresh_current_address(IpVersion::V4).await;

    assert!(matches!(result, Err(Error::Lookup(_))));
    assert!(store.latest(IpVersion::V4).await.unwrap().is_none());
}

#[tokio::test]
async fn repeated_results_store_once_new_ip_appends() {
    let source = MockAddressSource::new(IpVersion::V4);
    let store = Arc::new(MemoryAddressStore::new());
    source.push_refresh_ok("198.51.100.7");

    let pipeline = pipeline_with(&source, &store, 50);
    let mut current = pipeline.observe_current_address(IpVersion::V4);
    wait_for(&mut current, |item| item.is_some()).await;
    assert_eq!(store.len(IpVersion::V4).await, 1);

    // The same value observed again is a no-op append
    source.emit(Some(Address::new("198.51.100.7", IpVersion::V4)));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(store.len(IpVersion::V4).await, 1);

    // A changed value appends exactly one record
    source.emit(Some(Address::new("198.51.100.8", IpVersion::V4)));
    let changed = wait_for(&mut current, |item| {
        item.as_ref().is_some_and(|a| a.ip == "198.51.100.8")
    })
    .await;
    assert!(changed.is_some());
    assert_eq!(store.len(IpVersion::V4).await, 2);
}

#[tokio::test]
async fn racing_explicit_refreshes_store_one_record() {
    let source = MockAddressSource::new(IpVersion::V4);
    let store = Arc::new(MemoryAddressStore::new());
    source.push_refresh_ok("198.51.100.7");
    source.push_refresh_ok("198.51.100.7");

    let pipeline = pipeline_with(&source, &store, 50);
    let (a, b) = tokio::join!(
        pipeline.refresh_current_address(IpVersion::V4),
        pipeline.refresh_current_address(IpVersion::V4),
    );

    assert_eq!(a.unwrap().ip, "198.51.100.7");
    assert_eq!(b.unwrap().ip, "198.51.100.7");
    assert_eq!(store.len(IpVersion::V4).await, 1);
}

#[tokio::test]
async fn detached_observer_receives_nothing_after_teardown() {
    let source = MockAddressSource::new(IpVersion::V4);
    let store = Arc::new(MemoryAddressStore::new());
    source.push_refresh_ok("198.51.100.7");

    let pipeline = pipeline_with(&source, &store, 20);

    {
        let mut current = pipeline.observe_current_address(IpVersion::V4);
        wait_for(&mut current, |item| item.is_some()).await;
    }

    // Past the grace window the upstream subscription is gone; a late
    // lookup result reaches no observer and is not recorded
    tokio::time::sleep(Duration::from_millis(80)).await;
    source.emit(Some(Address::new("198.51.100.8", IpVersion::V4)));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(store.len(IpVersion::V4).await, 1);

    // A fresh subscriber restarts the observation cold
    source.push_refresh_ok("198.51.100.9");
    let mut current = pipeline.observe_current_address(IpVersion::V4);
    wait_for(&mut current, |item| {
        item.as_ref().is_some_and(|a| a.ip == "198.51.100.9")
    })
    .await;
    assert_eq!(source.observe_call_count(), 2);
}

#[tokio::test]
async fn resubscribe_within_grace_reuses_warm_subscription() {
    let source = MockAddressSource::new(IpVersion::V4);
    let store = Arc::new(MemoryAddressStore::new());
    source.push_refresh_ok("198.51.100.7");

    let pipeline = pipeline_with(&source, &store, 500);

    {
        let mut current = pipeline.observe_current_address(IpVersion::V4);
        wait_for(&mut current, |item| item.is_some()).await;
    }

    // Resubscribing quickly must not re-issue a refresh
    let mut current = pipeline.observe_current_address(IpVersion::V4);
    wait_for(&mut current, |item| item.is_some()).await;

    assert_eq!(source.observe_call_count(), 1);
    assert_eq!(source.refresh_call_count(), 1);
}

#[tokio::test]
async fn storage_failure_surfaces_as_error() {
    let source = MockAddressSource::new(IpVersion::V4);
    source.push_refresh_ok("198.51.100.7");

    let pipeline = AddressHistoryPipeline::new(
        source.clone(),
        MockAddressSource::new(IpVersion::V6),
        FailingStore::new(),
        Arc::new(MemoryPreferences::new()),
        pipeline_config(50),
    );

    let result = pipeline.refresh_current_address(IpVersion::V4).await;
    assert!(matches!(result, Err(Error::Store(_))));
}

#[tokio::test]
async fn observation_survives_storage_failure() {
    // A failing insert is reported, but the observer still sees the value
    let source = MockAddressSource::new(IpVersion::V4);
    source.push_refresh_ok("198.51.100.7");

    let pipeline = AddressHistoryPipeline::new(
        source.clone(),
        MockAddressSource::new(IpVersion::V6),
        FailingStore::new(),
        Arc::new(MemoryPreferences::new()),
        pipeline_config(50),
    );

    let mut current = pipeline.observe_current_address(IpVersion::V4);
    let address = wait_for(&mut current, |item| item.is_some()).await;
    assert_eq!(address.unwrap().ip, "198.51.100.7");
}
