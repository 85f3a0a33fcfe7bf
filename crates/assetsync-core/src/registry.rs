// ── Subscription registry ──
//
// Reference-counts channel interest so the server only hears about 0→1
// and 1→0 transitions, and replays every active channel after a
// (re)connect. The check-send-insert sequence for a channel runs under
// that channel's map entry guard, and the replay snapshot iterates the
// same map, so a concurrent subscribe is either in the replay or sent
// after it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use assetsync_api::{Envelope, MessageKind};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tracing::debug;

use crate::connection::{ConnectionManager, ReplaySource};
use crate::router::{EventRouter, HandlerResult, RoutedEvent, Subscription, TOPIC_MESSAGE};

/// Well-known channels and the event topics they carry.
const CHANNEL_TOPICS: &[(&str, &[&str])] = &[
    ("dashboard_metrics", &["dashboard_update"]),
    ("asset_changes", &["asset_status_change"]),
    ("request_changes", &["request_status_change"]),
    ("alerts", &["alert_new", "alert_resolved"]),
];

/// Event topics delivered to callbacks of `channel`.
///
/// Any other channel carries events whose `type` equals the channel name.
pub fn channel_topics(channel: &str) -> Vec<&str> {
    CHANNEL_TOPICS
        .iter()
        .find(|(name, _)| *name == channel)
        .map_or_else(|| vec![channel], |(_, topics)| topics.to_vec())
}

type SharedCallback = Arc<dyn Fn(&RoutedEvent) -> HandlerResult + Send + Sync>;

// ── SubscriptionRegistry ─────────────────────────────────────────────

/// Channel-level subscription bookkeeping on top of the connection and
/// the router. Cheaply cloneable.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    connection: ConnectionManager,
    router: EventRouter,
    channels: DashMap<String, ChannelEntry>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct ChannelEntry {
    /// One slot per local callback; the refcount is the slot count.
    callbacks: HashMap<u64, Vec<Subscription>>,
}

impl SubscriptionRegistry {
    /// Create a registry and register it as the connection's replay source.
    pub fn new(connection: ConnectionManager, router: EventRouter) -> Self {
        let inner = Arc::new(RegistryInner {
            connection,
            router,
            channels: DashMap::new(),
            next_id: AtomicU64::new(0),
        });
        let replay: Weak<dyn ReplaySource> = Arc::<RegistryInner>::downgrade(&inner);
        inner.connection.install_replay(replay);
        Self { inner }
    }

    /// Register `callback` for events on `channel`.
    ///
    /// The first local subscriber sends `{type:"subscribe"}` for the
    /// channel (when connected; otherwise the next replay covers it).
    pub fn subscribe<F>(&self, channel: &str, callback: F) -> ChannelSubscription
    where
        F: Fn(&RoutedEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handles = self.route_callback(channel, Arc::new(callback));

        match self.inner.channels.entry(channel.to_owned()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().callbacks.insert(id, handles);
                debug!(channel, refcount = entry.get().callbacks.len(), "Channel refcount up");
            }
            Entry::Vacant(entry) => {
                let sent = self.inner.connection.send(Envelope::subscribe([channel]));
                debug!(channel, sent, "Channel activated");
                entry.insert(ChannelEntry::default()).callbacks.insert(id, handles);
            }
        }

        ChannelSubscription {
            registry: Arc::downgrade(&self.inner),
            channel: channel.to_owned(),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Channels with at least one local subscriber, sorted.
    pub fn active_channels(&self) -> Vec<String> {
        self.inner.active_channels()
    }

    pub fn refcount(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map_or(0, |entry| entry.callbacks.len())
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    /// One router subscription per topic the channel carries.
    fn route_callback(&self, channel: &str, callback: SharedCallback) -> Vec<Subscription> {
        if CHANNEL_TOPICS.iter().any(|(name, _)| *name == channel)
            || MessageKind::from_type(channel).is_domain()
        {
            return channel_topics(channel)
                .into_iter()
                .map(|topic| {
                    let callback = Arc::clone(&callback);
                    self.inner.router.subscribe(topic, move |event| callback(event))
                })
                .collect();
        }

        // Unrecognized types arrive on the fallback topic tagged with their
        // original `type`.
        let wanted = channel.to_owned();
        let sub = self.inner.router.subscribe(TOPIC_MESSAGE, move |event| {
            if event.data.get("type").and_then(Value::as_str) == Some(wanted.as_str()) {
                callback(event)
            } else {
                Ok(())
            }
        });
        vec![sub]
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("active_channels", &self.active_channels())
            .finish_non_exhaustive()
    }
}

impl RegistryInner {
    fn unsubscribe(&self, channel: &str, id: u64) {
        let removed = match self.channels.entry(channel.to_owned()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().callbacks.remove(&id);
                if entry.get().callbacks.is_empty() {
                    let sent = self.connection.send(Envelope::unsubscribe([channel]));
                    debug!(channel, sent, "Channel deactivated");
                    entry.remove();
                } else if removed.is_some() {
                    debug!(channel, refcount = entry.get().callbacks.len(), "Channel refcount down");
                }
                removed
            }
            Entry::Vacant(_) => None,
        };
        // Router handles unsubscribe on drop, outside the entry guard.
        drop(removed);
    }

    fn active_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .channels
            .iter()
            .filter(|entry| !entry.callbacks.is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        channels.sort();
        channels
    }
}

impl ReplaySource for RegistryInner {
    fn replay(&self) -> Option<Envelope> {
        let channels = self.active_channels();
        if channels.is_empty() {
            None
        } else {
            Some(Envelope::subscribe(channels))
        }
    }
}

// ── ChannelSubscription ──────────────────────────────────────────────

/// Handle for one channel callback. `unsubscribe` is idempotent and also
/// runs on drop.
#[derive(Debug)]
pub struct ChannelSubscription {
    registry: Weak<RegistryInner>,
    channel: String,
    id: u64,
    active: AtomicBool,
}

impl ChannelSubscription {
    /// Returns `false` if already unsubscribed.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.channel, self.id);
        }
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
