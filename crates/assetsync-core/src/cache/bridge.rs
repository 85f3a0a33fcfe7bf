// ── Cache sync bridge ──
//
// Applies push events to the query cache: `dashboard_update` patches the
// cached metrics in place, everything else in the invalidation map marks
// entries stale for the pull layer to refetch. Runs synchronously inside
// router dispatch, so writes happen in delivery order.

use std::cell::Cell;
use std::sync::Arc;

use assetsync_api::MessageKind;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, trace};

use super::invalidation::{SyncMode, rule_for};
use super::query_cache::{CacheEntry, CacheKey, QueryCache};
use crate::router::{EventRouter, Subscription};

/// Fields added by the router rather than sent as payload.
const ROUTER_FIELDS: &[&str] = &["timestamp"];

/// What one event did to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Merged(Vec<CacheKey>),
    Invalidated(Vec<CacheKey>),
    /// No rule, or nothing to merge into.
    Skipped,
}

/// Keeps the query cache consistent with server-pushed events while
/// attached. Dropping it detaches.
pub struct CacheSyncBridge {
    cache: Arc<dyn QueryCache>,
    subscriptions: Vec<Subscription>,
}

impl CacheSyncBridge {
    /// Subscribe to every domain topic on `router`.
    pub fn attach(router: &EventRouter, cache: Arc<dyn QueryCache>) -> Self {
        let subscriptions = MessageKind::DOMAIN_TYPES
            .iter()
            .map(|topic| {
                let cache = Arc::clone(&cache);
                router.subscribe(topic, move |event| {
                    let outcome = apply(cache.as_ref(), &event.topic, &event.data);
                    trace!(topic = %event.topic, ?outcome, "Cache sync");
                    Ok(())
                })
            })
            .collect();

        Self {
            cache,
            subscriptions,
        }
    }

    pub fn cache(&self) -> &Arc<dyn QueryCache> {
        &self.cache
    }
}

impl std::fmt::Debug for CacheSyncBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSyncBridge")
            .field("topics", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}

/// Apply one routed event (`{...payload, timestamp}`) to `cache`.
pub fn apply(cache: &dyn QueryCache, event_type: &str, data: &Value) -> SyncOutcome {
    let Some(rule) = rule_for(&MessageKind::from_type(event_type)) else {
        return SyncOutcome::Skipped;
    };

    match rule.mode {
        SyncMode::Merge => {
            let merged: Vec<CacheKey> = rule
                .resources
                .iter()
                .map(|resource| CacheKey::unfiltered(*resource))
                .filter(|key| merge_into(cache, key, data))
                .collect();
            if merged.is_empty() {
                debug!(event_type, "Nothing cached to merge into");
                SyncOutcome::Skipped
            } else {
                SyncOutcome::Merged(merged)
            }
        }
        SyncMode::Invalidate => {
            let mut invalidated = Vec::new();
            for resource in rule.resources {
                invalidated.extend(invalidate_resource(cache, resource));
            }
            debug!(event_type, keys = invalidated.len(), "Invalidated cache entries");
            SyncOutcome::Invalidated(invalidated)
        }
    }
}

/// Shallow merge into an existing object entry. `stale_at` is untouched.
fn merge_into(cache: &dyn QueryCache, key: &CacheKey, data: &Value) -> bool {
    let Value::Object(patch) = data else {
        return false;
    };

    let merged = Cell::new(false);
    cache.set(key, &|current| {
        let current = current?;
        let Some(Value::Object(fields)) = &current.data else {
            return None;
        };
        let mut fields = fields.clone();
        for (name, value) in patch {
            if !ROUTER_FIELDS.contains(&name.as_str()) {
                fields.insert(name.clone(), value.clone());
            }
        }
        merged.set(true);
        Some(CacheEntry {
            data: Some(Value::Object(fields)),
            updated_at: Utc::now(),
            ..current.clone()
        })
    });
    merged.get()
}

/// Mark every entry of `resource` stale, or create a stale placeholder
/// under the unfiltered key when nothing is cached yet.
fn invalidate_resource(cache: &dyn QueryCache, resource: &str) -> Vec<CacheKey> {
    let keys = cache.entries_for(resource);
    if keys.is_empty() {
        let key = CacheKey::unfiltered(resource);
        let now = Utc::now();
        cache.set(&key, &|current| match current {
            Some(existing) => Some(CacheEntry {
                stale_at: Some(now),
                ..existing.clone()
            }),
            None => Some(CacheEntry::stale_placeholder(now)),
        });
        return vec![key];
    }

    for key in &keys {
        cache.invalidate(key);
    }
    keys
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use assetsync_api::Envelope;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::cache::MemoryQueryCache;

    fn stale_entry(data: Value) -> CacheEntry {
        let mut entry = CacheEntry::fetched(data);
        entry.stale_at = Some(Utc::now() + chrono::Duration::minutes(5));
        entry
    }

    #[test]
    fn dashboard_update_merges_without_touching_stale_at() {
        let cache = MemoryQueryCache::new();
        let key = CacheKey::unfiltered("metrics");
        let original = stale_entry(json!({ "totalAssets": 40, "openRequests": 3 }));
        cache.insert(key.clone(), original.clone());

        let outcome = apply(
            &cache,
            "dashboard_update",
            &json!({ "totalAssets": 42, "timestamp": 1_700_000_000_000_i64 }),
        );

        assert_eq!(outcome, SyncOutcome::Merged(vec![key.clone()]));
        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.data, Some(json!({ "totalAssets": 42, "openRequests": 3 })));
        assert_eq!(entry.stale_at, original.stale_at);
    }

    #[test]
    fn dashboard_update_without_entry_is_skipped() {
        let cache = MemoryQueryCache::new();
        let outcome = apply(&cache, "dashboard_update", &json!({ "totalAssets": 42 }));
        assert_eq!(outcome, SyncOutcome::Skipped);
        assert!(cache.is_empty());
    }

    #[test]
    fn dashboard_update_into_placeholder_is_skipped() {
        let cache = MemoryQueryCache::new();
        let key = CacheKey::unfiltered("metrics");
        cache.insert(key.clone(), CacheEntry::stale_placeholder(Utc::now()));

        let outcome = apply(&cache, "dashboard_update", &json!({ "totalAssets": 42 }));
        assert_eq!(outcome, SyncOutcome::Skipped);
        assert_eq!(cache.get(&key).unwrap().data, None);
    }

    #[test]
    fn alert_new_without_entry_creates_stale_placeholder() {
        let cache = MemoryQueryCache::new();
        let outcome = apply(&cache, "alert_new", &json!({ "id": "a-1" }));

        let key = CacheKey::unfiltered("alerts");
        assert_eq!(outcome, SyncOutcome::Invalidated(vec![key.clone()]));
        let entry = cache.get(&key).unwrap();
        assert!(entry.is_stale(Utc::now()));
        assert_eq!(entry.data, None);
    }

    #[test]
    fn status_change_invalidates_every_filter_signature() {
        let cache = MemoryQueryCache::new();
        cache.insert(CacheKey::unfiltered("metrics"), CacheEntry::fetched(json!({})));
        cache.insert(CacheKey::new("alerts", "open"), CacheEntry::fetched(json!([])));
        cache.insert(CacheKey::new("alerts", "closed"), CacheEntry::fetched(json!([])));

        let outcome = apply(&cache, "asset_status_change", &json!({ "assetId": "x" }));
        let SyncOutcome::Invalidated(keys) = outcome else {
            panic!("expected invalidation, got {outcome:?}");
        };
        assert_eq!(keys.len(), 4, "metrics, analytics placeholder, two alerts");

        let now = Utc::now();
        for key in keys {
            assert!(cache.get(&key).unwrap().is_stale(now), "{key} not stale");
        }
        // Data survives invalidation.
        assert_eq!(cache.get(&CacheKey::unfiltered("metrics")).unwrap().data, Some(json!({})));
    }

    #[test]
    fn unknown_types_leave_cache_alone() {
        let cache = MemoryQueryCache::new();
        assert_eq!(apply(&cache, "maintenance", &json!({})), SyncOutcome::Skipped);
        assert_eq!(cache.version(), 0);
    }

    #[test]
    fn attached_bridge_reacts_to_router_dispatch() {
        let router = EventRouter::new();
        let cache = Arc::new(MemoryQueryCache::new());
        cache.insert(CacheKey::unfiltered("metrics"), CacheEntry::fetched(json!({ "totalAssets": 40 })));

        let bridge = CacheSyncBridge::attach(&router, cache.clone());
        router.dispatch(&Envelope::new("dashboard_update", Some(json!({ "totalAssets": 42 }))));
        assert_eq!(
            cache.get(&CacheKey::unfiltered("metrics")).unwrap().data,
            Some(json!({ "totalAssets": 42 }))
        );

        drop(bridge);
        router.dispatch(&Envelope::new("dashboard_update", Some(json!({ "totalAssets": 50 }))));
        assert_eq!(
            cache.get(&CacheKey::unfiltered("metrics")).unwrap().data,
            Some(json!({ "totalAssets": 42 }))
        );
    }
}
