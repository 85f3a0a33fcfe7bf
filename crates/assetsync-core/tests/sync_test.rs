#![allow(clippy::unwrap_used)]
// End to end: push events through `DashboardSync` into the query cache.

mod common;

use std::sync::Arc;

use assetsync_core::{
    CacheEntry, CacheKey, ConnectionState, DashboardSync, MemoryQueryCache, QueryCache, SyncConfig,
};
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;

use common::{MockConnector, MockPeer, test_config};

fn sync_config(channels: &[&str]) -> SyncConfig {
    let mut config = SyncConfig::new(Url::parse("ws://127.0.0.1:9/ws").unwrap());
    config.connection = test_config();
    config.channels = channels.iter().map(ToString::to_string).collect();
    config
}

async fn start(
    channels: &[&str],
    cache: Arc<MemoryQueryCache>,
) -> (DashboardSync, MockConnector, MockPeer) {
    let connector = MockConnector::new();
    let sync = DashboardSync::start(connector.clone(), &sync_config(channels), cache);
    let peer = connector.next_peer().await;
    let mut rx = sync.connection().watch_status();
    rx.wait_for(|s| s.state == ConnectionState::Connected)
        .await
        .unwrap();
    (sync, connector, peer)
}

/// Round-trip a server ping so every earlier frame has been handled.
async fn settle(peer: &mut MockPeer) {
    peer.send(&json!({ "type": "ping" }));
    while let Some(envelope) = peer.recv().await {
        if envelope.kind == "pong" {
            return;
        }
    }
    panic!("client went away");
}

#[tokio::test(start_paused = true)]
async fn test_configured_channels_are_replayed_on_connect() {
    let cache = Arc::new(MemoryQueryCache::new());
    let (sync, _connector, mut peer) = start(&["dashboard_metrics", "alerts"], cache).await;

    let first = peer.recv().await.unwrap();
    assert_eq!(first.kind, "subscribe");
    assert_eq!(
        first.channels.unwrap(),
        vec!["alerts".to_owned(), "dashboard_metrics".to_owned()]
    );
    assert_eq!(
        sync.registry().active_channels(),
        vec!["alerts", "dashboard_metrics"]
    );

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_dashboard_update_merges_into_metrics() {
    let cache = Arc::new(MemoryQueryCache::new());
    let key = CacheKey::unfiltered("metrics");
    cache.insert(key.clone(), CacheEntry::fetched(json!({ "totalAssets": 40, "checkedOut": 7 })));
    let stale_at_before = cache.get(&key).unwrap().stale_at;

    let (sync, _connector, mut peer) = start(&["dashboard_metrics"], Arc::clone(&cache)).await;
    peer.send(&json!({
        "type": "dashboard_update",
        "payload": { "totalAssets": 42 },
        "timestamp": 1_760_000_000_000_i64,
    }));
    settle(&mut peer).await;

    let entry = cache.get(&key).unwrap();
    assert_eq!(entry.data, Some(json!({ "totalAssets": 42, "checkedOut": 7 })));
    assert_eq!(entry.stale_at, stale_at_before);
    assert_eq!(sync.telemetry().snapshot().message_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_alert_without_cache_entry_creates_stale_marker() {
    let cache = Arc::new(MemoryQueryCache::new());
    let (sync, _connector, mut peer) = start(&["alerts"], Arc::clone(&cache)).await;

    peer.send(&json!({ "type": "alert_new", "payload": { "id": "alert-9", "severity": "high" } }));
    settle(&mut peer).await;

    let entry = cache.get(&CacheKey::unfiltered("alerts")).unwrap();
    assert!(entry.is_stale(Utc::now()));
    assert_eq!(entry.data, None);
    assert_eq!(sync.connection().state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_status_change_invalidates_dependent_resources() {
    let cache = Arc::new(MemoryQueryCache::new());
    for resource in ["metrics", "analytics", "alerts"] {
        cache.insert(CacheKey::unfiltered(resource), CacheEntry::fetched(json!({})));
    }
    let (_sync, _connector, mut peer) = start(&["request_changes"], Arc::clone(&cache)).await;

    peer.send(&json!({ "type": "request_status_change", "payload": { "requestId": "r-1" } }));
    settle(&mut peer).await;

    let now = Utc::now();
    for resource in ["metrics", "analytics", "alerts"] {
        let entry = cache.get(&CacheKey::unfiltered(resource)).unwrap();
        assert!(entry.is_stale(now), "{resource} should be stale");
        assert_eq!(entry.data, Some(json!({})));
    }
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_are_counted_not_fatal() {
    let cache = Arc::new(MemoryQueryCache::new());
    let (sync, connector, mut peer) = start(&[], cache).await;

    peer.send_raw("}{");
    peer.send(&json!({ "type": "unknown_kind", "payload": { "x": 1 } }));
    settle(&mut peer).await;

    let snapshot = sync.telemetry().snapshot();
    assert_eq!(snapshot.protocol_errors, 1);
    assert_eq!(snapshot.message_count, 1);
    assert_eq!(connector.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_object_frames_leave_metrics_untouched() {
    let cache = Arc::new(MemoryQueryCache::new());
    let key = CacheKey::unfiltered("metrics");
    cache.insert(key.clone(), CacheEntry::fetched(json!({ "totalAssets": 40 })));

    let (sync, connector, mut peer) = start(&["dashboard_metrics"], Arc::clone(&cache)).await;
    peer.send_raw(r#"["dashboard_update", {"totalAssets": 999}]"#);
    peer.send(&json!({ "type": "dashboard_update", "payload": [1, 2] }));
    settle(&mut peer).await;

    assert_eq!(cache.get(&key).unwrap().data, Some(json!({ "totalAssets": 40 })));
    let snapshot = sync.telemetry().snapshot();
    assert_eq!(snapshot.protocol_errors, 2);
    assert_eq!(snapshot.message_count, 0);
    assert_eq!(connector.opens(), 1);
}
