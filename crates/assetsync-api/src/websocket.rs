//! WebSocket transport for the push channel.
//!
//! [`WsConnector`] opens a `tokio-tungstenite` client connection and hands
//! back a [`WsTransport`] that speaks in [`Frame`]s. Reconnection, heartbeat
//! and backoff live one layer up in `assetsync-core`; this module only knows
//! how to open, read, write and close a single socket.
//!
//! # Example
//!
//! ```rust,ignore
//! use assetsync_api::websocket::WsConnector;
//! use assetsync_api::{Connector, Transport};
//! use url::Url;
//!
//! let connector = WsConnector::new(Url::parse("wss://inventory.example.com/ws")?)?;
//! let mut transport = connector.connect().await?;
//! transport.send_text(r#"{"type":"subscribe","channels":["alerts"]}"#.into()).await?;
//!
//! while let Some(Ok(frame)) = transport.recv().await {
//!     println!("{frame:?}");
//! }
//! ```

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Error;
use crate::transport::{Connector, Frame, Transport};

/// Close frame without a status code (RFC 6455 §7.4.1).
const CLOSE_NO_STATUS: u16 = 1005;

// ── WsConnector ──────────────────────────────────────────────────────

/// Opens WebSocket connections to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    headers: Vec<(String, String)>,
}

impl WsConnector {
    /// Create a connector for a `ws://` or `wss://` URL.
    pub fn new(url: Url) -> Result<Self, Error> {
        match url.scheme() {
            "ws" | "wss" => Ok(Self {
                url,
                headers: Vec::new(),
            }),
            other => Err(Error::InvalidUrl(format!(
                "expected ws:// or wss:// scheme, got {other}://"
            ))),
        }
    }

    /// Add a header to every upgrade request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self) -> Result<WsTransport, Error> {
        tracing::info!(url = %self.url, "Connecting to WebSocket");

        let uri: tungstenite::http::Uri = self
            .url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::InvalidUrl(e.to_string()))?;

        let mut request = ClientRequestBuilder::new(uri);
        for (name, value) in &self.headers {
            request = request.with_header(name.clone(), value.clone());
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::info!("WebSocket connected");
        Ok(WsTransport { stream })
    }
}

// ── WsTransport ──────────────────────────────────────────────────────

/// A single open WebSocket connection.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| Error::WebSocketSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, Error>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(Error::WebSocketRead(e.to_string()))),
            };

            match message {
                Message::Text(text) => return Some(Ok(Frame::Text(text.to_string()))),
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(Frame::Text(text))),
                    Err(_) => tracing::debug!("Ignoring non-UTF-8 binary frame"),
                },
                Message::Close(frame) => {
                    let (code, reason) = frame.map_or_else(
                        || (CLOSE_NO_STATUS, String::new()),
                        |cf| (u16::from(cf.code), cf.reason.to_string()),
                    );
                    tracing::info!(code, reason = %reason, "WebSocket close frame received");
                    return Some(Ok(Frame::Close { code, reason }));
                }
                // tungstenite queues pong replies automatically
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| Error::WebSocketSend(e.to_string()))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
