// ── Event router ──
//
// Topic-keyed callback fan-out. Inbound envelopes are routed by `type`;
// local events (`connection`, `latency`) are published with `emit`.
// Callbacks are cloned out of the table before invocation, so a callback
// may subscribe or unsubscribe without deadlocking the router.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use assetsync_api::{Envelope, MessageKind, now_millis};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{trace, warn};

use crate::error::CoreError;

/// Connection lifecycle events: `{status: "connected" | "disconnected" |
/// "reconnecting" | "failed", ...}`.
pub const TOPIC_CONNECTION: &str = "connection";

/// Heartbeat round trips: `{latencyMs}`.
pub const TOPIC_LATENCY: &str = "latency";

/// Fallback bucket for envelope types the client does not recognize. The
/// original `type` is kept in the event data.
pub const TOPIC_MESSAGE: &str = "message";

/// Outcome of one callback invocation. An `Err` is logged and counted; it
/// never affects sibling callbacks.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Callback = Arc<dyn Fn(&RoutedEvent) -> HandlerResult + Send + Sync>;

/// What a callback receives.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub topic: String,
    /// Payload fields merged with the envelope `timestamp`.
    pub data: Value,
}

impl RoutedEvent {
    /// The sender timestamp, if present.
    pub fn timestamp(&self) -> Option<i64> {
        self.data.get("timestamp").and_then(Value::as_i64)
    }
}

/// Read-only tap on router activity. All methods default to no-ops.
pub trait DispatchObserver: Send + Sync {
    /// An inbound envelope was routed to `topic`.
    fn on_dispatch(&self, _topic: &str) {}

    fn on_subscriber_error(&self, _error: &CoreError) {}

    /// An inbound frame could not be decoded.
    fn on_protocol_error(&self, _message: &str) {}
}

// ── EventRouter ──────────────────────────────────────────────────────

/// Cheaply cloneable fan-out table.
#[derive(Clone, Default)]
pub struct EventRouter {
    shared: Arc<RouterShared>,
}

#[derive(Default)]
struct RouterShared {
    topics: DashMap<String, Vec<(u64, Callback)>>,
    next_id: AtomicU64,
    observers: RwLock<Vec<Arc<dyn DispatchObserver>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `topic`. Dropping the returned handle (or
    /// calling [`Subscription::unsubscribe`]) removes it.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Subscription
    where
        F: Fn(&RoutedEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .topics
            .entry(topic.to_owned())
            .or_default()
            .push((id, Arc::new(callback)));
        trace!(topic, id, "Router subscription added");

        Subscription {
            router: Arc::downgrade(&self.shared),
            topic: topic.to_owned(),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Attach a telemetry-style observer. Observers live as long as the
    /// router.
    pub fn add_observer(&self, observer: Arc<dyn DispatchObserver>) {
        match self.shared.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    /// Route an inbound envelope to its topic. Returns the number of
    /// callbacks invoked.
    ///
    /// `ping` and `pong` are heartbeat traffic and are never delivered.
    /// An envelope whose payload is neither an object nor null is dropped
    /// and reported as a protocol error.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let kind = envelope.message_kind();
        let topic = match &kind {
            MessageKind::Ping | MessageKind::Pong => return 0,
            k if k.is_domain() => k.as_str(),
            _ => TOPIC_MESSAGE,
        };

        let Some(mut data) = event_data(envelope) else {
            warn!(kind = %envelope.kind, "Dropping envelope with non-object payload");
            self.report_protocol_error("expected an object payload");
            return 0;
        };
        if topic == TOPIC_MESSAGE {
            if let Value::Object(map) = &mut data {
                map.insert("type".into(), Value::String(envelope.kind.clone()));
            }
        }

        for observer in self.observers() {
            observer.on_dispatch(topic);
        }
        self.deliver(topic, data)
    }

    /// Publish a locally generated event. Returns the number of callbacks
    /// invoked.
    pub fn emit(&self, topic: &str, data: Value) -> usize {
        self.deliver(topic, data)
    }

    /// Tell observers an inbound frame was dropped.
    pub fn report_protocol_error(&self, message: &str) {
        for observer in self.observers() {
            observer.on_protocol_error(message);
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared.topics.get(topic).map_or(0, |entry| entry.len())
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn deliver(&self, topic: &str, data: Value) -> usize {
        let callbacks: Vec<Callback> = match self.shared.topics.get(topic) {
            Some(entry) => entry.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return 0,
        };

        let event = RoutedEvent {
            topic: topic.to_owned(),
            data,
        };
        for callback in &callbacks {
            let message = match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            self.subscriber_failed(topic, message);
        }
        callbacks.len()
    }

    fn subscriber_failed(&self, topic: &str, message: String) {
        warn!(topic, error = %message, "Subscriber failed");
        let error = CoreError::Subscriber {
            topic: topic.to_owned(),
            message,
        };
        for observer in self.observers() {
            observer.on_subscriber_error(&error);
        }
    }

    fn observers(&self) -> Vec<Arc<dyn DispatchObserver>> {
        match self.shared.observers.read() {
            Ok(observers) => observers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("topics", &self.shared.topics.len())
            .finish_non_exhaustive()
    }
}

impl RouterShared {
    fn remove(&self, topic: &str, id: u64) {
        self.topics.remove_if_mut(topic, |_, callbacks| {
            callbacks.retain(|(cb_id, _)| *cb_id != id);
            callbacks.is_empty()
        });
    }
}

/// `{...payload, timestamp}`, or `None` when the payload is not an object.
fn event_data(envelope: &Envelope) -> Option<Value> {
    let mut data = match &envelope.payload {
        Some(Value::Object(map)) => map.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(_) => return None,
    };
    data.insert(
        "timestamp".into(),
        Value::from(envelope.timestamp.unwrap_or_else(now_millis)),
    );
    Some(Value::Object(data))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_owned()
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Handle for one router callback registration.
///
/// `unsubscribe` is idempotent and also runs on drop.
#[derive(Debug)]
pub struct Subscription {
    router: Weak<RouterShared>,
    topic: String,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the callback. Returns `false` if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(router) = self.router.upgrade() {
            router.remove(&self.topic, self.id);
        }
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
