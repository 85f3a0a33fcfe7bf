// ── Connection lifecycle ──
//
// A single tokio task owns the transport, the heartbeat and the reconnect
// schedule. Everything else talks to it through the cloneable
// `ConnectionManager` handle.

mod backoff;
mod deadline;
mod manager;

use std::time::Duration;

use assetsync_api::Envelope;

pub use manager::ConnectionManager;

/// Lifecycle state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Snapshot published on every state or latency change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Bumped each time a transport opens. Sends stamped with an older
    /// epoch are discarded by the connection task.
    pub epoch: u64,
    /// Consecutive failed attempts since the last successful connect.
    pub attempt_count: u32,
    /// Round trip of the most recent ping/pong.
    pub latency: Option<Duration>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            epoch: 0,
            attempt_count: 0,
            latency: None,
        }
    }
}

/// Supplies the message written right after every successful open, before
/// any other outbound traffic.
///
/// The subscription registry implements this to re-announce its active
/// channels. Called on the connection task; must not block.
pub trait ReplaySource: Send + Sync {
    fn replay(&self) -> Option<Envelope>;
}
