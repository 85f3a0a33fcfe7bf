// ── Query cache contract ──
//
// The bridge only needs `get` / `set` / `invalidate` on entries keyed by
// `(resource, filter)`. `MemoryQueryCache` is a concurrent in-process
// implementation with push-based change notification.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;

/// `(resource_name, filter_signature)`. The empty filter signature names
/// the unfiltered query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub resource: String,
    pub filter: String,
}

impl CacheKey {
    pub fn new(resource: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            filter: filter.into(),
        }
    }

    /// The unfiltered key for `resource`.
    pub fn unfiltered(resource: impl Into<String>) -> Self {
        Self::new(resource, String::new())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.filter.is_empty() {
            f.write_str(&self.resource)
        } else {
            write!(f, "{}[{}]", self.resource, self.filter)
        }
    }
}

/// Where the pull layer is with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FetchStatus {
    Idle,
    Fetching,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// `None` for placeholders that have never been fetched.
    pub data: Option<Value>,
    /// The entry is stale once this instant has passed.
    pub stale_at: Option<DateTime<Utc>>,
    pub fetch_status: FetchStatus,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// A successfully fetched entry.
    pub fn fetched(data: Value) -> Self {
        Self {
            data: Some(data),
            stale_at: None,
            fetch_status: FetchStatus::Success,
            updated_at: Utc::now(),
        }
    }

    /// A data-less entry that is already stale, so the next read refetches.
    pub fn stale_placeholder(now: DateTime<Utc>) -> Self {
        Self {
            data: None,
            stale_at: Some(now),
            fetch_status: FetchStatus::Idle,
            updated_at: now,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.stale_at.is_some_and(|at| at <= now)
    }
}

/// The slice of the query cache the sync bridge depends on.
///
/// Implementations must be safe to call from the connection task; writes
/// are last-writer-wins.
pub trait QueryCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Read-modify-write one entry. `update` sees the current entry (if
    /// any); returning `None` leaves the cache unchanged. `update` runs
    /// under the entry lock and must not call back into the cache.
    fn set(&self, key: &CacheKey, update: &dyn Fn(Option<&CacheEntry>) -> Option<CacheEntry>);

    /// Mark an existing entry stale as of now. No-op when absent.
    fn invalidate(&self, key: &CacheKey);

    /// Every key cached for `resource`, across all filter signatures.
    fn entries_for(&self, resource: &str) -> Vec<CacheKey>;
}

// ── MemoryQueryCache ─────────────────────────────────────────────────

/// Concurrent in-memory [`QueryCache`].
///
/// Every mutation bumps a version counter published on a `watch`
/// channel, so views can re-read on change.
pub struct MemoryQueryCache {
    entries: DashMap<CacheKey, CacheEntry>,
    version: watch::Sender<u64>,
}

impl MemoryQueryCache {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            entries: DashMap::new(),
            version,
        }
    }

    /// Store an entry unconditionally, as a fetch completing would.
    pub fn insert(&self, key: CacheKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
        self.bump_version();
    }

    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        let removed = self.entries.remove(key).map(|(_, entry)| entry);
        if removed.is_some() {
            self.bump_version();
        }
        removed
    }

    /// Subscribe to the mutation counter.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn bump_version(&self) {
        // `send_modify` updates unconditionally, even with zero receivers.
        self.version.send_modify(|v| *v += 1);
    }
}

impl Default for MemoryQueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache for MemoryQueryCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &CacheKey, update: &dyn Fn(Option<&CacheEntry>) -> Option<CacheEntry>) {
        let changed = match self.entries.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => match update(Some(entry.get())) {
                Some(next) => {
                    entry.insert(next);
                    true
                }
                None => false,
            },
            dashmap::mapref::entry::Entry::Vacant(entry) => match update(None) {
                Some(next) => {
                    entry.insert(next);
                    true
                }
                None => false,
            },
        };
        if changed {
            self.bump_version();
        }
    }

    fn invalidate(&self, key: &CacheKey) {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return;
        };
        entry.stale_at = Some(Utc::now());
        drop(entry);
        self.bump_version();
    }

    fn entries_for(&self, resource: &str) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|entry| entry.key().resource == resource)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for MemoryQueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueryCache")
            .field("entries", &self.entries.len())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn invalidate_marks_existing_entry_stale() {
        let cache = MemoryQueryCache::new();
        let key = CacheKey::unfiltered("metrics");
        cache.insert(key.clone(), CacheEntry::fetched(json!({ "totalAssets": 40 })));
        assert!(!cache.get(&key).unwrap().is_stale(Utc::now()));

        cache.invalidate(&key);
        let entry = cache.get(&key).unwrap();
        assert!(entry.is_stale(Utc::now()));
        assert_eq!(entry.data, Some(json!({ "totalAssets": 40 })));
    }

    #[test]
    fn invalidate_missing_key_is_noop() {
        let cache = MemoryQueryCache::new();
        cache.invalidate(&CacheKey::unfiltered("alerts"));
        assert!(cache.is_empty());
        assert_eq!(cache.version(), 0);
    }

    #[test]
    fn set_returning_none_leaves_cache_untouched() {
        let cache = MemoryQueryCache::new();
        let key = CacheKey::unfiltered("metrics");
        cache.set(&key, &|_| None);
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.version(), 0);
    }

    #[test]
    fn entries_for_spans_filter_signatures() {
        let cache = MemoryQueryCache::new();
        cache.insert(CacheKey::new("alerts", "severity=high"), CacheEntry::fetched(json!([])));
        cache.insert(CacheKey::unfiltered("alerts"), CacheEntry::fetched(json!([])));
        cache.insert(CacheKey::unfiltered("metrics"), CacheEntry::fetched(json!({})));

        assert_eq!(
            cache.entries_for("alerts"),
            vec![CacheKey::unfiltered("alerts"), CacheKey::new("alerts", "severity=high")]
        );
    }

    #[test]
    fn mutations_bump_version() {
        let cache = MemoryQueryCache::new();
        let rx = cache.changes();
        let key = CacheKey::unfiltered("analytics");
        cache.insert(key.clone(), CacheEntry::fetched(json!({})));
        cache.invalidate(&key);
        cache.remove(&key);
        assert_eq!(*rx.borrow(), 3);
    }

    #[test]
    fn key_display() {
        assert_eq!(CacheKey::unfiltered("metrics").to_string(), "metrics");
        assert_eq!(CacheKey::new("alerts", "open").to_string(), "alerts[open]");
    }
}
