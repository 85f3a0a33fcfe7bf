// assetsync-core: real-time dashboard synchronization.
//
// Keeps a push channel to the inventory server alive (heartbeat, backoff,
// replayed subscriptions), routes server events to local subscribers and
// reconciles them with the client query cache.

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod registry;
pub mod router;
pub mod sync;
pub mod telemetry;

// ── Primary re-exports ───────────────────────────────────────────
pub use cache::{
    CacheEntry, CacheKey, CacheSyncBridge, FetchStatus, MemoryQueryCache, QueryCache, SyncMode,
    SyncOutcome,
};
pub use config::{ConnectionConfig, HeartbeatConfig, ReconnectPolicy, SyncConfig};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus, ReplaySource};
pub use error::CoreError;
pub use registry::{ChannelSubscription, SubscriptionRegistry, channel_topics};
pub use router::{
    DispatchObserver, EventRouter, HandlerResult, RoutedEvent, Subscription, TOPIC_CONNECTION,
    TOPIC_LATENCY, TOPIC_MESSAGE,
};
pub use sync::DashboardSync;
pub use telemetry::{PerformanceTelemetry, TelemetrySnapshot};

// Wire types consumers commonly need alongside the core API.
pub use assetsync_api::{Connector, Envelope, MessageKind, Transport, WsConnector};
