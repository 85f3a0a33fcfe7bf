// ── Performance telemetry ──
//
// Passive counters fed by the router (observer hooks plus the `latency`
// and `connection` topics). Nothing here can block or fail the sync path:
// every field is an atomic.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::CoreError;
use crate::router::{DispatchObserver, EventRouter, Subscription, TOPIC_CONNECTION, TOPIC_LATENCY};

/// Point-in-time view of the counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    /// Inbound envelopes routed since the last reset.
    pub message_count: u64,
    /// Sum of observed heartbeat latencies.
    pub total_latency_ms: u64,
    /// `total_latency_ms / message_count`, 0 with no messages.
    pub avg_latency_ms: f64,
    /// Messages per second since the previous snapshot.
    pub update_frequency: f64,
    pub latency_samples: u64,
    pub subscriber_errors: u64,
    pub protocol_errors: u64,
    pub reconnects: u64,
}

#[derive(Debug)]
pub struct PerformanceTelemetry {
    origin: Instant,
    message_count: AtomicU64,
    total_latency_ms: AtomicU64,
    latency_samples: AtomicU64,
    subscriber_errors: AtomicU64,
    protocol_errors: AtomicU64,
    reconnects: AtomicU64,
    /// Start of the current rate window, in ms since `origin`.
    window_start_ms: AtomicU64,
    /// `message_count` when the current rate window started.
    window_messages: AtomicU64,
}

impl PerformanceTelemetry {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            message_count: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
            subscriber_errors: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            window_start_ms: AtomicU64::new(0),
            window_messages: AtomicU64::new(0),
        }
    }

    /// Start observing `router`. The returned handles keep the latency and
    /// connection taps alive.
    pub fn attach(self: &Arc<Self>, router: &EventRouter) -> Vec<Subscription> {
        let observer: Arc<dyn DispatchObserver> = Arc::<Self>::clone(self);
        router.add_observer(observer);

        let latency = {
            let telemetry = Arc::clone(self);
            router.subscribe(TOPIC_LATENCY, move |event| {
                if let Some(ms) = event.data.get("latencyMs").and_then(Value::as_u64) {
                    telemetry.record_latency(ms);
                }
                Ok(())
            })
        };
        let connection = {
            let telemetry = Arc::clone(self);
            router.subscribe(TOPIC_CONNECTION, move |event| {
                if event.data.get("status").and_then(Value::as_str) == Some("reconnecting") {
                    telemetry.reconnects.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            })
        };
        vec![latency, connection]
    }

    pub fn record_message(&self) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency_ms: u64) {
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Read the counters and start a new rate window.
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let now_ms = self.elapsed_ms();
        let message_count = self.message_count.load(Ordering::Relaxed);
        let total_latency_ms = self.total_latency_ms.load(Ordering::Relaxed);

        let window_start = self.window_start_ms.swap(now_ms, Ordering::Relaxed);
        let window_messages = self.window_messages.swap(message_count, Ordering::Relaxed);
        let window_ms = now_ms.saturating_sub(window_start);
        let update_frequency = if window_ms == 0 {
            0.0
        } else {
            message_count.saturating_sub(window_messages) as f64 * 1000.0 / window_ms as f64
        };

        let avg_latency_ms = if message_count == 0 {
            0.0
        } else {
            total_latency_ms as f64 / message_count as f64
        };

        TelemetrySnapshot {
            message_count,
            total_latency_ms,
            avg_latency_ms,
            update_frequency,
            latency_samples: self.latency_samples.load(Ordering::Relaxed),
            subscriber_errors: self.subscriber_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter and rebase the rate window to now.
    pub fn reset_metrics(&self) {
        for counter in [
            &self.message_count,
            &self.total_latency_ms,
            &self.latency_samples,
            &self.subscriber_errors,
            &self.protocol_errors,
            &self.reconnects,
            &self.window_messages,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.window_start_ms
            .store(self.elapsed_ms(), Ordering::Relaxed);
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for PerformanceTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchObserver for PerformanceTelemetry {
    fn on_dispatch(&self, _topic: &str) {
        self.record_message();
    }

    fn on_subscriber_error(&self, _error: &CoreError) {
        self.subscriber_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn on_protocol_error(&self, _message: &str) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }
}
