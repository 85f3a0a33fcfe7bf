// Fixed map from domain event type to its effect on the query cache.

use assetsync_api::MessageKind;

/// How an event reconciles with cached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SyncMode {
    /// Shallow-merge payload fields into the cached object.
    Merge,
    /// Mark entries stale so the pull layer refetches.
    Invalidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationRule {
    pub mode: SyncMode,
    pub resources: &'static [&'static str],
}

pub const METRICS: &str = "metrics";
pub const ANALYTICS: &str = "analytics";
pub const ALERTS: &str = "alerts";

/// The cache effect of an event type, or `None` for types with no effect.
pub fn rule_for(kind: &MessageKind) -> Option<InvalidationRule> {
    let rule = match kind {
        MessageKind::DashboardUpdate => InvalidationRule {
            mode: SyncMode::Merge,
            resources: &[METRICS],
        },
        MessageKind::AssetStatusChange | MessageKind::RequestStatusChange => InvalidationRule {
            mode: SyncMode::Invalidate,
            resources: &[METRICS, ANALYTICS, ALERTS],
        },
        MessageKind::AlertNew | MessageKind::AlertResolved => InvalidationRule {
            mode: SyncMode::Invalidate,
            resources: &[ALERTS],
        },
        MessageKind::Ping
        | MessageKind::Pong
        | MessageKind::Subscribe
        | MessageKind::Unsubscribe
        | MessageKind::Other(_) => return None,
    };
    Some(rule)
}
