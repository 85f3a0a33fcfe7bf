// ── Core error types ──
//
// User-facing errors from assetsync-core. None of these escapes the
// connection task: transport failures feed the reconnect schedule and
// protocol/subscriber failures are logged and counted. They surface to
// callers only from the few operations that wait on the connection.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Connection task has shut down")]
    ConnectionClosed,

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Message errors ───────────────────────────────────────────────
    #[error("Dropped malformed message: {message}")]
    Protocol { message: String },

    #[error("Subscriber on '{topic}' failed: {message}")]
    Subscriber { topic: String, message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<assetsync_api::Error> for CoreError {
    fn from(err: assetsync_api::Error) -> Self {
        match err {
            assetsync_api::Error::ConnectTimeout { timeout_ms } => CoreError::Timeout { timeout_ms },
            assetsync_api::Error::InvalidUrl(reason) => CoreError::Config {
                message: format!("Invalid URL: {reason}"),
            },
            assetsync_api::Error::Protocol { message, .. } => CoreError::Protocol { message },
            assetsync_api::Error::Serialization(e) => CoreError::Protocol {
                message: e.to_string(),
            },
            e @ (assetsync_api::Error::WebSocketConnect(_)
            | assetsync_api::Error::WebSocketSend(_)
            | assetsync_api::Error::WebSocketRead(_)) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: e.to_string(),
            },
        }
    }
}
