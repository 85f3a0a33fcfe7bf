// ── ConnectionManager ──
//
// Handle + actor pair. The handle is cheap to clone and only ever pushes
// commands into an unbounded channel; the actor (`ConnectionTask`) owns the
// transport, the status watch and every timer, and handles exactly one
// command, frame or deadline at a time.

use std::sync::{Arc, Weak};
use std::time::Duration;

use assetsync_api::{
    CLOSE_ABNORMAL, CLOSE_HEARTBEAT_TIMEOUT, CLOSE_NORMAL, Connector, Envelope, Error as ApiError,
    Frame, MessageKind, Transport, is_clean_close, now_millis,
};
use serde_json::json;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::deadline::Deadline;
use super::{ConnectionState, ConnectionStatus, ReplaySource};
use crate::config::ConnectionConfig;
use crate::error::CoreError;
use crate::router::{EventRouter, TOPIC_CONNECTION, TOPIC_LATENCY};

/// Upper bound on waiting for our own close frame to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

enum Command {
    /// `seen_epoch` is the epoch the caller observed. Any open attempt that
    /// started after that satisfies the request.
    Connect { seen_epoch: u64 },
    Disconnect,
    Send { envelope: Envelope, epoch: u64 },
    InstallReplay(Weak<dyn ReplaySource>),
}

// ── Handle ───────────────────────────────────────────────────────────

/// Owner of the single push-channel connection.
///
/// Cheaply cloneable. Construct one per sync session with
/// [`spawn`](Self::spawn) and stop it with [`teardown`](Self::teardown);
/// dropping every handle also stops the background task.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Start the connection task. Does NOT connect: call
    /// [`connect`](Self::connect).
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<C: Connector>(connector: C, config: ConnectionConfig, router: EventRouter) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let cancel = CancellationToken::new();

        let task = ConnectionTask {
            connector,
            cancel: cancel.clone(),
            backoff: Backoff::new(config.reconnect),
            config,
            router,
            commands: command_rx,
            status_tx,
            current: ConnectionStatus::default(),
            replay: None,
            transport: None,
            heartbeat: Deadline::default(),
            pong_timeout: Deadline::default(),
            reconnect: Deadline::default(),
            last_ping_at: None,
            last_pong_at: None,
        };
        let handle = tokio::spawn(task.run());

        Self {
            inner: Arc::new(ManagerInner {
                commands: command_tx,
                status: status_rx,
                cancel,
                task: Mutex::new(Some(handle)),
            }),
        }
    }

    /// Open the connection. No-op while `Connecting` or `Connected`; from
    /// `Reconnecting` the pending timer is skipped and the open happens now.
    ///
    /// The decision is made by the connection task when it gets to the
    /// request, so `disconnect(); connect();` reconnects as expected.
    pub fn connect(&self) {
        self.command(Command::Connect {
            seen_epoch: self.status().epoch,
        });
    }

    /// Close cleanly (code 1000) and stay down until the next `connect()`.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Hand an envelope to the connection task.
    ///
    /// Returns `true` iff the connection was `Connected` at call time.
    /// Offline sends are dropped, not queued; the subscription registry
    /// replays channel state after every reconnect instead.
    pub fn send(&self, envelope: Envelope) -> bool {
        let status = self.status();
        if status.state != ConnectionState::Connected {
            debug!(kind = %envelope.kind, state = %status.state, "Dropping offline send");
            return false;
        }
        self.inner
            .commands
            .send(Command::Send {
                envelope,
                epoch: status.epoch,
            })
            .is_ok()
    }

    /// Latest published status.
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    /// Subscribe to status changes (state, attempt count, latency).
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.clone()
    }

    /// Register the source of the post-connect replay message.
    ///
    /// Held weakly so the source can own a handle to this manager.
    pub fn install_replay(&self, source: Weak<dyn ReplaySource>) {
        self.command(Command::InstallReplay(source));
    }

    /// Wait until the connection reaches `target`.
    ///
    /// Reaching `Failed` while waiting for anything else is reported as
    /// [`CoreError::ReconnectExhausted`].
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        timeout: Duration,
    ) -> Result<ConnectionStatus, CoreError> {
        let mut rx = self.watch_status();
        let wait = rx.wait_for(|s| {
            s.state == target || (s.state == ConnectionState::Failed && target != s.state)
        });

        let status = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(status)) => *status,
            Ok(Err(_)) => return Err(CoreError::ConnectionClosed),
            Err(_) => {
                return Err(CoreError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        };

        if status.state == target {
            Ok(status)
        } else {
            Err(CoreError::ReconnectExhausted {
                attempts: status.attempt_count,
            })
        }
    }

    /// Disconnect and stop the background task. Commands already queued
    /// are handled first; once the task has stopped, commands are ignored.
    pub async fn teardown(&self) {
        self.inner.cancel.cancel();
        let handle = self.inner.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Connection task ended abnormally");
            }
        }
    }

    fn command(&self, command: Command) {
        if self.inner.commands.send(command).is_err() {
            debug!("Connection task has shut down; command ignored");
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ── Actor ────────────────────────────────────────────────────────────

struct ConnectionTask<C: Connector> {
    connector: C,
    cancel: CancellationToken,
    config: ConnectionConfig,
    router: EventRouter,
    commands: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<ConnectionStatus>,
    current: ConnectionStatus,
    replay: Option<Weak<dyn ReplaySource>>,
    transport: Option<C::Transport>,
    backoff: Backoff,
    heartbeat: Deadline,
    pong_timeout: Deadline,
    reconnect: Deadline,
    last_ping_at: Option<Instant>,
    last_pong_at: Option<Instant>,
}

impl<C: Connector> ConnectionTask<C> {
    async fn run(mut self) {
        debug!("Connection task started");
        let cancel = self.cancel.clone();
        loop {
            let pong_timeout = self.pong_timeout.expired();
            let heartbeat = self.heartbeat.expired();
            let reconnect = self.reconnect.expired();

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shut_down().await;
                        break;
                    }
                },
                () = cancel.cancelled() => {
                    self.shut_down().await;
                    break;
                }
                frame = recv_frame(&mut self.transport) => self.handle_frame(frame).await,
                () = pong_timeout => self.on_pong_timeout().await,
                () = heartbeat => self.on_heartbeat().await,
                () = reconnect => {
                    self.reconnect.cancel();
                    self.open().await;
                }
            }
        }
        debug!("Connection task stopped");
    }

    // ── Commands ─────────────────────────────────────────────────────

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { seen_epoch } => self.on_connect_request(seen_epoch).await,
            Command::Disconnect => self.close_cleanly("client disconnect").await,
            Command::Send { envelope, epoch } => {
                if epoch == self.current.epoch
                    && self.current.state == ConnectionState::Connected
                    && self.transport.is_some()
                {
                    self.write(&envelope).await;
                } else {
                    debug!(kind = %envelope.kind, epoch, current = self.current.epoch, "Discarding stale send");
                }
            }
            Command::InstallReplay(source) => self.replay = Some(source),
        }
    }

    async fn on_connect_request(&mut self, seen_epoch: u64) {
        if seen_epoch != self.current.epoch {
            debug!("connect() already served by a later attempt");
            return;
        }
        match self.current.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(state = %self.current.state, "connect() ignored");
            }
            ConnectionState::Reconnecting => {
                self.reconnect.cancel();
                self.open().await;
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.current.attempt_count = 0;
                self.backoff.reset();
                self.open().await;
            }
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    async fn open(&mut self) {
        self.current.epoch += 1;
        self.set_state(ConnectionState::Connecting);
        info!(epoch = self.current.epoch, attempt = self.current.attempt_count, "Opening connection");

        let timeout = self.config.connect_timeout;
        let result = match tokio::time::timeout(timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::ConnectTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match result {
            Ok(transport) => self.on_open(transport).await,
            Err(e) => {
                warn!(error = %e, attempt = self.current.attempt_count, "Connection attempt failed");
                self.on_abnormal_close(CLOSE_ABNORMAL, &e.to_string());
            }
        }
    }

    async fn on_open(&mut self, transport: C::Transport) {
        self.transport = Some(transport);
        self.current.attempt_count = 0;
        self.backoff.reset();
        self.pong_timeout.cancel();
        self.last_ping_at = None;
        self.heartbeat.arm(self.config.heartbeat.interval);
        self.set_state(ConnectionState::Connected);
        info!(epoch = self.current.epoch, "Connected");

        // Replay goes out before the loop can service any queued send.
        let replay = self
            .replay
            .as_ref()
            .and_then(Weak::upgrade)
            .and_then(|source| source.replay());
        if let Some(envelope) = replay {
            debug!(channels = ?envelope.channels, "Replaying subscriptions");
            self.write(&envelope).await;
        }

        if self.current.state == ConnectionState::Connected {
            self.router
                .emit(TOPIC_CONNECTION, json!({ "status": "connected" }));
        }
    }

    /// Any close other than code 1000: retry with backoff or give up.
    fn on_abnormal_close(&mut self, code: u16, reason: &str) {
        self.drop_transport();

        let max_attempts = self.config.reconnect.max_attempts;
        if self.current.attempt_count < max_attempts {
            self.current.attempt_count += 1;
            let delay = self.backoff.advance();
            self.reconnect.arm(delay);
            self.set_state(ConnectionState::Reconnecting);

            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            warn!(
                code,
                reason,
                attempt = self.current.attempt_count,
                delay_ms,
                "Connection lost, reconnect scheduled"
            );
            self.router.emit(
                TOPIC_CONNECTION,
                json!({
                    "status": "reconnecting",
                    "attempt": self.current.attempt_count,
                    "delayMs": delay_ms,
                }),
            );
        } else {
            self.reconnect.cancel();
            self.set_state(ConnectionState::Failed);
            error!(
                code,
                reason,
                attempts = self.current.attempt_count,
                "Reconnect attempts exhausted"
            );
            self.router.emit(
                TOPIC_CONNECTION,
                json!({ "status": "failed", "attempts": self.current.attempt_count }),
            );
        }
    }

    /// Peer closed with 1000.
    fn on_clean_close(&mut self, reason: &str) {
        self.drop_transport();
        self.reconnect.cancel();
        info!(reason, "Server closed the connection");
        self.set_state(ConnectionState::Disconnected);
        self.router
            .emit(TOPIC_CONNECTION, json!({ "status": "disconnected" }));
    }

    /// Local disconnect: cancel everything, send 1000, stay down.
    async fn close_cleanly(&mut self, reason: &str) {
        self.reconnect.cancel();
        self.heartbeat.cancel();
        self.pong_timeout.cancel();
        if let Some(mut transport) = self.transport.take() {
            close_transport(&mut transport, CLOSE_NORMAL, reason).await;
        }

        if self.current.state != ConnectionState::Disconnected {
            info!(reason, "Disconnected");
            self.set_state(ConnectionState::Disconnected);
            self.router
                .emit(TOPIC_CONNECTION, json!({ "status": "disconnected" }));
        }
    }

    async fn shut_down(&mut self) {
        self.close_cleanly("teardown").await;
        self.commands.close();
    }

    fn drop_transport(&mut self) {
        self.transport = None;
        self.heartbeat.cancel();
        self.pong_timeout.cancel();
        self.last_ping_at = None;
    }

    // ── Heartbeat ────────────────────────────────────────────────────

    async fn on_heartbeat(&mut self) {
        self.heartbeat.arm(self.config.heartbeat.interval);
        if self.pong_timeout.is_armed() {
            debug!("Previous ping still unanswered; skipping");
            return;
        }

        self.last_ping_at = Some(Instant::now());
        self.pong_timeout.arm(self.config.heartbeat.pong_timeout);
        self.write(&Envelope::ping(now_millis())).await;
    }

    fn on_pong(&mut self) {
        let Some(sent_at) = self.last_ping_at.take() else {
            debug!("Unsolicited pong ignored");
            return;
        };
        let now = Instant::now();
        let latency = now.saturating_duration_since(sent_at);
        self.pong_timeout.cancel();
        self.last_pong_at = Some(now);
        self.current.latency = Some(latency);
        self.publish();

        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        debug!(latency_ms, "Heartbeat acknowledged");
        self.router
            .emit(TOPIC_LATENCY, json!({ "latencyMs": latency_ms }));
    }

    async fn on_pong_timeout(&mut self) {
        self.pong_timeout.cancel();
        let since_last_pong_ms = self
            .last_pong_at
            .map(|at| u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX));
        warn!(?since_last_pong_ms, "Heartbeat timed out");

        if let Some(mut transport) = self.transport.take() {
            close_transport(&mut transport, CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout").await;
        }
        self.on_abnormal_close(CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout");
    }

    // ── Inbound ──────────────────────────────────────────────────────

    async fn handle_frame(&mut self, frame: Option<Result<Frame, ApiError>>) {
        match frame {
            Some(Ok(Frame::Text(text))) => self.handle_text(&text).await,
            Some(Ok(Frame::Close { code, reason })) => {
                if is_clean_close(code) {
                    self.on_clean_close(&reason);
                } else {
                    self.on_abnormal_close(code, &reason);
                }
            }
            Some(Err(e)) => self.on_abnormal_close(CLOSE_ABNORMAL, &e.to_string()),
            None => self.on_abnormal_close(CLOSE_ABNORMAL, "stream ended without close frame"),
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping malformed message");
                self.router.report_protocol_error(&e.to_string());
                return;
            }
        };

        match envelope.message_kind() {
            MessageKind::Pong => self.on_pong(),
            MessageKind::Ping => self.write(&Envelope::pong(now_millis())).await,
            _ => {
                self.router.dispatch(&envelope);
            }
        }
    }

    // ── Outbound ─────────────────────────────────────────────────────

    async fn write(&mut self, envelope: &Envelope) {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(kind = %envelope.kind, error = %e, "Failed to encode outbound message");
                return;
            }
        };
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        if let Err(e) = transport.send_text(text).await {
            warn!(kind = %envelope.kind, error = %e, "Write failed");
            self.on_abnormal_close(CLOSE_ABNORMAL, &e.to_string());
        }
    }

    // ── Status ───────────────────────────────────────────────────────

    fn set_state(&mut self, state: ConnectionState) {
        self.current.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.current);
    }
}

/// Next frame from the open transport; pending forever while there is none.
async fn recv_frame<T: Transport>(transport: &mut Option<T>) -> Option<Result<Frame, ApiError>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn close_transport<T: Transport>(transport: &mut T, code: u16, reason: &str) {
    match tokio::time::timeout(CLOSE_GRACE, transport.close(code, reason)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(code, error = %e, "Close frame not delivered"),
        Err(_) => debug!(code, "Close frame timed out"),
    }
}
