// assetsync-api: Wire envelope and transport layer for the dashboard push channel

pub mod envelope;
pub mod error;
pub mod transport;
pub mod websocket;

pub use envelope::{Envelope, MessageKind, now_millis};
pub use error::Error;
pub use transport::{
    CLOSE_ABNORMAL, CLOSE_HEARTBEAT_TIMEOUT, CLOSE_NORMAL, Connector, Frame, Transport,
    is_clean_close,
};
pub use websocket::{WsConnector, WsTransport};
