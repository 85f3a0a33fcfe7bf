// ── Query cache reconciliation ──

mod bridge;
mod invalidation;
mod query_cache;

pub use bridge::{CacheSyncBridge, SyncOutcome, apply};
pub use invalidation::{ALERTS, ANALYTICS, InvalidationRule, METRICS, SyncMode, rule_for};
pub use query_cache::{CacheEntry, CacheKey, FetchStatus, MemoryQueryCache, QueryCache};
