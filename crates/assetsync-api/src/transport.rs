// Transport seam between the connection state machine and the wire.
//
// The connection manager only ever talks to a `Connector` / `Transport`
// pair, so the WebSocket implementation and in-memory test doubles are
// interchangeable.

use std::future::Future;

use crate::error::Error;

/// Clean close. Suppresses automatic reconnection.
pub const CLOSE_NORMAL: u16 = 1000;

/// Abnormal closure: transport error or stream ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Forced close after a missed heartbeat reply.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;

/// Returns `true` if a close with this code must not trigger reconnection.
pub fn is_clean_close(code: u16) -> bool {
    code == CLOSE_NORMAL
}

/// An inbound unit read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 text message.
    Text(String),
    /// The peer closed the connection.
    Close { code: u16, reason: String },
}

/// An open, bidirectional connection.
pub trait Transport: Send + 'static {
    /// Write one text frame.
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), Error>> + Send;

    /// Read the next frame. `None` means the stream ended without a close
    /// frame. Must be cancel-safe: it is polled inside `select!`.
    fn recv(&mut self) -> impl Future<Output = Option<Result<Frame, Error>>> + Send;

    /// Send a close frame with the given code. Errors are informational;
    /// the transport is dropped afterwards either way.
    fn close(&mut self, code: u16, reason: &str) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Opens transports. One connector is owned by one connection manager.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    fn connect(&self) -> impl Future<Output = Result<Self::Transport, Error>> + Send;
}
