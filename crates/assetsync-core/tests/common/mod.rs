// In-memory transport for connection-level tests.
//
// `MockConnector` hands the connection task a `MockTransport` and the test
// the matching `MockPeer`, which plays the server side.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assetsync_api::{Connector, Envelope, Error as ApiError, Frame, Transport};
use assetsync_core::{
    ConnectionConfig, ConnectionManager, EventRouter, HeartbeatConfig, ReconnectPolicy,
    SubscriptionRegistry, Subscription, TOPIC_CONNECTION,
};
use serde_json::Value;
use tokio::sync::mpsc;

// ── Connector ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MockConnector {
    shared: Arc<MockShared>,
}

struct MockShared {
    accept: AtomicBool,
    connect_calls: AtomicUsize,
    opens: AtomicUsize,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
    closes: Mutex<Vec<u16>>,
    peers_tx: mpsc::UnboundedSender<MockPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockPeer>>,
}

impl MockConnector {
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(MockShared {
                accept: AtomicBool::new(true),
                connect_calls: AtomicUsize::new(0),
                opens: AtomicUsize::new(0),
                open_now: AtomicUsize::new(0),
                max_open: AtomicUsize::new(0),
                closes: Mutex::new(Vec::new()),
                peers_tx,
                peers_rx: tokio::sync::Mutex::new(peers_rx),
            }),
        }
    }

    /// Refuse (or accept again) subsequent connection attempts.
    pub fn set_accept(&self, accept: bool) {
        self.shared.accept.store(accept, Ordering::SeqCst);
    }

    /// Every `connect()` call, successful or not.
    pub fn connect_calls(&self) -> usize {
        self.shared.connect_calls.load(Ordering::SeqCst)
    }

    /// Successful opens.
    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn open_now(&self) -> usize {
        self.shared.open_now.load(Ordering::SeqCst)
    }

    /// High-water mark of simultaneously open transports.
    pub fn max_open(&self) -> usize {
        self.shared.max_open.load(Ordering::SeqCst)
    }

    /// Close codes the client sent, in order.
    pub fn closes(&self) -> Vec<u16> {
        self.shared.closes.lock().unwrap().clone()
    }

    /// The server side of the next accepted connection.
    pub async fn next_peer(&self) -> MockPeer {
        self.shared
            .peers_rx
            .lock()
            .await
            .recv()
            .await
            .expect("connector dropped")
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self) -> Result<MockTransport, ApiError> {
        self.shared.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.shared.accept.load(Ordering::SeqCst) {
            return Err(ApiError::WebSocketConnect("connection refused".into()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();

        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.shared.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_open.fetch_max(now, Ordering::SeqCst);

        let _ = self.shared.peers_tx.send(MockPeer {
            to_client,
            from_client,
        });
        Ok(MockTransport {
            inbound,
            outbound,
            shared: Arc::clone(&self.shared),
        })
    }
}

// ── Transport ───────────────────────────────────────────────────────

pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Result<Frame, ApiError>>,
    outbound: mpsc::UnboundedSender<String>,
    shared: Arc<MockShared>,
}

impl Transport for MockTransport {
    async fn send_text(&mut self, text: String) -> Result<(), ApiError> {
        self.outbound
            .send(text)
            .map_err(|_| ApiError::WebSocketSend("peer gone".into()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, ApiError>> {
        self.inbound.recv().await
    }

    async fn close(&mut self, code: u16, _reason: &str) -> Result<(), ApiError> {
        self.shared.closes.lock().unwrap().push(code);
        Ok(())
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.shared.open_now.fetch_sub(1, Ordering::SeqCst);
    }
}

// ── Peer ────────────────────────────────────────────────────────────

/// Server end of one mock connection. Dropping it ends the client's
/// stream without a close frame.
pub struct MockPeer {
    to_client: mpsc::UnboundedSender<Result<Frame, ApiError>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MockPeer {
    pub fn send(&self, message: &Value) {
        self.send_raw(&message.to_string());
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.to_client.send(Ok(Frame::Text(text.to_owned())));
    }

    pub fn close(&self, code: u16) {
        let _ = self.to_client.send(Ok(Frame::Close {
            code,
            reason: String::new(),
        }));
    }

    /// Next message from the client; `None` once the client side is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        let text = self.from_client.recv().await?;
        Some(Envelope::parse(&text).unwrap())
    }

    /// Everything the client sent before `marker`.
    pub async fn recv_until(&mut self, marker: &str) -> Vec<Envelope> {
        let mut seen = Vec::new();
        while let Some(envelope) = self.recv().await {
            if envelope.kind == marker {
                return seen;
            }
            seen.push(envelope);
        }
        panic!("client went away before `{marker}`; saw {seen:?}");
    }
}

// ── Harness ─────────────────────────────────────────────────────────

/// Deterministic timings: no jitter, three attempts.
pub fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        heartbeat: HeartbeatConfig {
            interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        },
        reconnect: ReconnectPolicy {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_jitter: Duration::ZERO,
            max_attempts: 3,
        },
        connect_timeout: Duration::from_secs(10),
    }
}

pub struct Harness {
    pub connector: MockConnector,
    pub router: EventRouter,
    pub connection: ConnectionManager,
    pub registry: SubscriptionRegistry,
    connection_events: Arc<Mutex<Vec<Value>>>,
    _tap: Subscription,
}

impl Harness {
    pub fn new(config: ConnectionConfig) -> Self {
        let connector = MockConnector::new();
        let router = EventRouter::new();

        let connection_events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&connection_events);
        let tap = router.subscribe(TOPIC_CONNECTION, move |event| {
            sink.lock().unwrap().push(event.data.clone());
            Ok(())
        });

        let connection = ConnectionManager::spawn(connector.clone(), config, router.clone());
        let registry = SubscriptionRegistry::new(connection.clone(), router.clone());

        Self {
            connector,
            router,
            connection,
            registry,
            connection_events,
            _tap: tap,
        }
    }

    /// `connect()` and return the server side once `Connected`.
    pub async fn connect(&self) -> MockPeer {
        self.connection.connect();
        let peer = self.connector.next_peer().await;
        self.wait_for(assetsync_core::ConnectionState::Connected).await;
        peer
    }

    pub async fn wait_for(&self, state: assetsync_core::ConnectionState) {
        let mut rx = self.connection.watch_status();
        rx.wait_for(|status| status.state == state).await.unwrap();
    }

    /// `connection` events seen so far.
    pub fn connection_events(&self) -> Vec<Value> {
        self.connection_events.lock().unwrap().clone()
    }

    /// Queue a marker behind everything already sent.
    pub fn send_marker(&self, marker: &str) {
        assert!(self.connection.send(Envelope::new(marker, None)), "not connected");
    }
}
