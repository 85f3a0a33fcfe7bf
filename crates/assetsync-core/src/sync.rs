// ── DashboardSync ──
//
// Composition root: one router, one connection, one registry, the cache
// bridge and telemetry, wired together for a single dashboard session.

use std::sync::Arc;

use assetsync_api::{Connector, WsConnector};
use tracing::{info, trace};

use crate::cache::{CacheSyncBridge, QueryCache};
use crate::config::SyncConfig;
use crate::connection::ConnectionManager;
use crate::error::CoreError;
use crate::registry::{ChannelSubscription, SubscriptionRegistry};
use crate::router::{EventRouter, HandlerResult, RoutedEvent, Subscription};
use crate::telemetry::PerformanceTelemetry;

/// A running sync session.
pub struct DashboardSync {
    router: EventRouter,
    connection: ConnectionManager,
    registry: SubscriptionRegistry,
    bridge: CacheSyncBridge,
    telemetry: Arc<PerformanceTelemetry>,
    telemetry_taps: Vec<Subscription>,
    configured_channels: Vec<ChannelSubscription>,
}

impl DashboardSync {
    /// Wire everything up, subscribe the configured channels and connect.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<C: Connector>(
        connector: C,
        config: &SyncConfig,
        cache: Arc<dyn QueryCache>,
    ) -> Self {
        let router = EventRouter::new();
        let telemetry = Arc::new(PerformanceTelemetry::new());
        let telemetry_taps = telemetry.attach(&router);
        let bridge = CacheSyncBridge::attach(&router, cache);

        let connection = ConnectionManager::spawn(connector, config.connection, router.clone());
        let registry = SubscriptionRegistry::new(connection.clone(), router.clone());

        let configured_channels = config
            .channels
            .iter()
            .map(|channel| registry.subscribe(channel, log_event))
            .collect();

        info!(url = %config.url, channels = ?config.channels, "Starting dashboard sync");
        connection.connect();

        Self {
            router,
            connection,
            registry,
            bridge,
            telemetry,
            telemetry_taps,
            configured_channels,
        }
    }

    /// [`start`](Self::start) over a WebSocket to `config.url`.
    pub fn connect_ws(config: &SyncConfig, cache: Arc<dyn QueryCache>) -> Result<Self, CoreError> {
        let connector = WsConnector::new(config.url.clone())?;
        Ok(Self::start(connector, config, cache))
    }

    pub fn subscribe<F>(&self, channel: &str, callback: F) -> ChannelSubscription
    where
        F: Fn(&RoutedEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.subscribe(channel, callback)
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn telemetry(&self) -> &Arc<PerformanceTelemetry> {
        &self.telemetry
    }

    pub fn cache(&self) -> &Arc<dyn QueryCache> {
        self.bridge.cache()
    }

    /// Disconnect cleanly and stop the connection task.
    pub async fn shutdown(self) {
        info!("Stopping dashboard sync");
        drop(self.configured_channels);
        self.connection.teardown().await;
        drop(self.telemetry_taps);
    }
}

impl std::fmt::Debug for DashboardSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardSync")
            .field("connection", &self.connection)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::unnecessary_wraps)]
fn log_event(event: &RoutedEvent) -> HandlerResult {
    trace!(topic = %event.topic, data = %event.data, "Event");
    Ok(())
}
