// ── Runtime sync configuration ──
//
// These types describe *how* to keep the push channel alive. They never
// touch disk: the CLI (via assetsync-config) or an embedding application
// constructs a `SyncConfig` and hands it in.

use std::time::Duration;

use url::Url;

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between pings while connected. Default: 30s.
    pub interval: Duration,
    /// How long to wait for the matching pong. Default: 10s.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_backoff: Duration,
    /// Upper bound on backoff delay. Default: 30s.
    pub max_backoff: Duration,
    /// Upper bound on the random jitter added at each doubling. Default: 1s.
    pub max_jitter: Duration,
    /// Automatic attempts before entering `Failed`. Default: 5.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_jitter: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

/// Everything the connection manager needs besides the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectPolicy,
    /// An open that takes longer than this counts as a failed attempt.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for one dashboard sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Push endpoint (`ws://` or `wss://`).
    pub url: Url,
    pub connection: ConnectionConfig,
    /// Channels to subscribe when the session starts.
    pub channels: Vec<String>,
}

impl SyncConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            connection: ConnectionConfig::default(),
            channels: Vec::new(),
        }
    }
}
