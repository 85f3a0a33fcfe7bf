use thiserror::Error;

/// Top-level error type for the `assetsync-api` crate.
///
/// Covers the transport and protocol failure modes of the push channel.
/// `assetsync-core` maps these into its own diagnostics; none of them is
/// ever fatal to the hosting process.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// Opening the transport failed (DNS, TCP, TLS, upgrade handshake).
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The open did not complete within the configured timeout.
    #[error("WebSocket connection timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    /// Writing a frame to an open transport failed.
    #[error("WebSocket send failed: {0}")]
    WebSocketSend(String),

    /// Reading from the transport failed mid-stream.
    #[error("WebSocket read failed: {0}")]
    WebSocketRead(String),

    /// URL parsing or scheme validation error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // ── Protocol ────────────────────────────────────────────────────
    /// An inbound frame was not a well-formed envelope.
    #[error("Malformed envelope: {message}")]
    Protocol { message: String, body: String },

    /// An outbound envelope could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if this error should feed the reconnect schedule
    /// rather than being dropped in place.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_)
                | Self::ConnectTimeout { .. }
                | Self::WebSocketSend(_)
                | Self::WebSocketRead(_)
        )
    }

    /// Returns `true` if this is a malformed-message error.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}
