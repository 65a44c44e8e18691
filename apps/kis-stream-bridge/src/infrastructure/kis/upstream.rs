//! Upstream Connection Manager
//!
//! Owns the single WebSocket connection to the KIS real-time stream.
//!
//! # Architecture
//!
//! ```text
//! SubscriptionRegistry ──► UpstreamHandle ──(unbounded, ordered)──► worker task
//!                                                                     │
//!                        CredentialProvider ◄── approval key ─────────┤
//!                                                                     ▼
//!                                                              KIS WebSocket
//! ```
//!
//! The registry talks to the connection only through [`UpstreamHandle`],
//! which queues commands for one worker task. The worker alone touches the
//! socket, so commands are applied in exactly the order the registry
//! produced them.
//!
//! # Lifecycle
//!
//! `Disconnected → Connecting → Connected → Disconnected → …`
//!
//! - connect: fetch the approval key, handshake (bounded by a timeout), then
//!   subscribe every symbol that currently has listeners *before* reading the
//!   first inbound frame
//! - every subscription frame asks the [`CredentialProvider`] for the key
//!   again, so a key refreshed mid-connection is picked up by the next frame
//! - any transport error, close, idle timeout or rejected control frame drops
//!   the connection and arms a reconnect timer with exponential backoff; a
//!   rejection also invalidates the approval key
//! - `ensure_connected` while a reconnect is pending connects right away

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{CredentialError, CredentialProvider, UpstreamControl};
use crate::domain::market::Symbol;
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::config::BridgeConfig;
use crate::infrastructure::kis::codec::{CodecError, FrameCodec, UpstreamFrame};
use crate::infrastructure::kis::heartbeat::{
    HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState,
};
use crate::infrastructure::kis::messages::TrType;
use crate::infrastructure::kis::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::infrastructure::metrics::{self, FrameKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// =============================================================================
// Configuration
// =============================================================================

/// Upstream connection configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Streaming WebSocket URL.
    pub url: String,
    /// Upper bound on the WebSocket handshake.
    pub handshake_timeout: Duration,
    /// Backoff between connection attempts.
    pub reconnect: ReconnectConfig,
    /// Transport ping and idle detection.
    pub heartbeat: HeartbeatConfig,
    /// Attempt a connection as soon as the worker starts.
    pub connect_on_start: bool,
}

impl UpstreamConfig {
    /// Configuration with default timings for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handshake_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            connect_on_start: true,
        }
    }

    /// Build from the service configuration.
    #[must_use]
    pub fn from_bridge_config(config: &BridgeConfig) -> Self {
        Self {
            url: config.endpoints.stream_url.clone(),
            handshake_timeout: config.upstream.handshake_timeout,
            reconnect: ReconnectConfig::from_upstream_settings(&config.upstream),
            heartbeat: HeartbeatConfig::from_upstream_settings(&config.upstream),
            connect_on_start: true,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Upstream connection errors. All of them lead to a backoff reconnect.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The approval key could not be obtained.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame encoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The handshake did not finish in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// A frame had to be sent while no connection exists.
    #[error("upstream not connected")]
    NotConnected,

    /// The vendor closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Nothing received within the idle timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// The vendor answered a request with a failure result.
    #[error("request rejected ({code}): {message}")]
    Rejected {
        /// Vendor message code.
        code: String,
        /// Vendor message.
        message: String,
    },
}

impl UpstreamError {
    /// Metric label for this error.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Credential(_) => "credential",
            Self::WebSocket(_) => "websocket",
            Self::Codec(_) => "codec",
            Self::HandshakeTimeout(_) => "handshake_timeout",
            Self::NotConnected => "not_connected",
            Self::ConnectionClosed => "connection_closed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Rejected { .. } => "rejected",
        }
    }
}

// =============================================================================
// Connection Status
// =============================================================================

/// Upstream connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    Disconnected = 0,
    /// A connection attempt is in progress.
    Connecting = 1,
    /// Connected and resubscribed.
    Connected = 2,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Process-wide view of the upstream connection.
#[derive(Debug)]
pub struct UpstreamStatus {
    state: AtomicU8,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    frames_received: AtomicU64,
    subscribed_symbols: AtomicUsize,
}

impl Default for UpstreamStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamStatus {
    /// Create a status in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            last_connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            frames_received: AtomicU64::new(0),
            subscribed_symbols: AtomicUsize::new(0),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
        metrics::set_upstream_connected(state == ConnectionState::Connected);
    }

    /// Move `Disconnected → Connecting`. Returns `false` if a connection
    /// exists or is already being established.
    pub fn try_begin_connect(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Disconnected as u8,
                ConnectionState::Connecting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn record_connected(&self) {
        *self.last_connected_at.write() = Some(Utc::now());
        self.reconnect_attempts.store(0, Ordering::Relaxed);
        self.set_state(ConnectionState::Connected);
    }

    fn record_error(&self, error: &UpstreamError) {
        *self.last_error.write() = Some(error.to_string());
    }

    fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    fn set_subscribed(&self, count: usize) {
        self.subscribed_symbols.store(count, Ordering::Relaxed);
        metrics::set_upstream_subscriptions(count);
    }

    /// Failed attempts since the last successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Most recent connection error.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> UpstreamSnapshot {
        UpstreamSnapshot {
            state: self.state(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error(),
            reconnect_attempts: self.reconnect_attempts(),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            subscribed_symbols: self.subscribed_symbols.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`UpstreamStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamSnapshot {
    /// Connection state.
    pub state: ConnectionState,
    /// Time of the last successful connect.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent connection error.
    pub last_error: Option<String>,
    /// Failed attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Frames received over the process lifetime.
    pub frames_received: u64,
    /// Symbols subscribed on the current connection.
    pub subscribed_symbols: usize,
}

// =============================================================================
// Handle
// =============================================================================

/// Command for the connection worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCommand {
    /// Connect now if not connected.
    EnsureConnected,
    /// A symbol gained its first listener.
    Subscribe(Symbol),
    /// A symbol lost its last listener.
    Unsubscribe(Symbol),
}

/// Cheap, cloneable front of the connection worker.
#[derive(Debug, Clone)]
pub struct UpstreamHandle {
    commands: mpsc::UnboundedSender<UpstreamCommand>,
    status: Arc<UpstreamStatus>,
}

impl UpstreamHandle {
    /// Create a handle and the command receiver for the worker.
    #[must_use]
    pub fn channel(
        status: Arc<UpstreamStatus>,
    ) -> (Self, mpsc::UnboundedReceiver<UpstreamCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        (Self { commands, status }, rx)
    }

    /// Shared connection status.
    #[must_use]
    pub fn status(&self) -> &Arc<UpstreamStatus> {
        &self.status
    }

    fn send(&self, command: UpstreamCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Upstream worker stopped, command dropped");
        }
    }
}

impl UpstreamControl for UpstreamHandle {
    fn ensure_connected(&self) {
        if self.status.try_begin_connect() {
            self.send(UpstreamCommand::EnsureConnected);
        }
    }

    fn subscribe(&self, symbol: &str) {
        self.send(UpstreamCommand::Subscribe(symbol.to_owned()));
    }

    fn unsubscribe(&self, symbol: &str) {
        self.send(UpstreamCommand::Unsubscribe(symbol.to_owned()));
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Connection {
    write: WsSink,
    read: WsSource,
    subscribed: HashSet<Symbol>,
    heartbeat_state: Arc<HeartbeatState>,
    heartbeat_rx: mpsc::Receiver<HeartbeatEvent>,
    heartbeat_cancel: CancellationToken,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.heartbeat_cancel.cancel();
    }
}

enum Step {
    Shutdown,
    Command(UpstreamCommand),
    ReconnectDue,
    Heartbeat(HeartbeatEvent),
    Inbound(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
}

/// The worker that owns the vendor connection.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use kis_stream_bridge::domain::subscription::SubscriptionRegistry;
/// use kis_stream_bridge::infrastructure::kis::auth::StaticCredentials;
/// use kis_stream_bridge::infrastructure::kis::upstream::{
///     UpstreamConfig, UpstreamConnectionManager, UpstreamHandle, UpstreamStatus,
/// };
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let status = Arc::new(UpstreamStatus::new());
///     let (handle, commands) = UpstreamHandle::channel(Arc::clone(&status));
///     let registry = Arc::new(SubscriptionRegistry::new(Arc::new(handle)));
///
///     let manager = UpstreamConnectionManager::new(
///         UpstreamConfig::new("ws://ops.koreainvestment.com:21000"),
///         Arc::new(StaticCredentials::new("approval", "token")),
///         registry,
///         commands,
///         status,
///         CancellationToken::new(),
///     );
///     tokio::spawn(manager.run());
/// }
/// ```
pub struct UpstreamConnectionManager {
    config: UpstreamConfig,
    credentials: Arc<dyn CredentialProvider>,
    registry: Arc<SubscriptionRegistry>,
    commands: mpsc::UnboundedReceiver<UpstreamCommand>,
    status: Arc<UpstreamStatus>,
    cancel: CancellationToken,
    codec: FrameCodec,
    policy: ReconnectPolicy,
    connection: Option<Connection>,
    reconnect_at: Option<Instant>,
}

impl UpstreamConnectionManager {
    /// Create a worker. Nothing happens until [`run`](Self::run) is awaited.
    #[must_use]
    pub fn new(
        config: UpstreamConfig,
        credentials: Arc<dyn CredentialProvider>,
        registry: Arc<SubscriptionRegistry>,
        commands: mpsc::UnboundedReceiver<UpstreamCommand>,
        status: Arc<UpstreamStatus>,
        cancel: CancellationToken,
    ) -> Self {
        let policy = ReconnectPolicy::new(config.reconnect.clone());
        Self {
            config,
            credentials,
            registry,
            commands,
            status,
            cancel,
            codec: FrameCodec::new(),
            policy,
            connection: None,
            reconnect_at: None,
        }
    }

    /// Run until cancelled. Never gives up on the vendor.
    pub async fn run(mut self) {
        tracing::info!(url = %self.config.url, "Upstream connection manager started");

        if self.config.connect_on_start && self.status.try_begin_connect() {
            self.connect().await;
        }

        loop {
            match self.next_step().await {
                Step::Shutdown => break,
                Step::Command(command) => self.apply_command(command).await,
                Step::ReconnectDue => {
                    self.reconnect_at = None;
                    self.status.set_state(ConnectionState::Connecting);
                    self.connect().await;
                }
                Step::Heartbeat(HeartbeatEvent::SendPing) => {
                    if let Err(e) = self.send_message(Message::Ping(Vec::new().into())).await {
                        self.drop_connection(&e);
                    }
                }
                Step::Heartbeat(HeartbeatEvent::Timeout) => {
                    self.drop_connection(&UpstreamError::HeartbeatTimeout);
                }
                Step::Inbound(message) => self.handle_inbound(message).await,
            }
        }

        self.close_connection().await;
        self.reconnect_at = None;
        self.status.set_state(ConnectionState::Disconnected);
        tracing::info!("Upstream connection manager stopped");
    }

    async fn next_step(&mut self) -> Step {
        let reconnect_at = self.reconnect_at;

        let Some(connection) = self.connection.as_mut() else {
            return tokio::select! {
                biased;
                () = self.cancel.cancelled() => Step::Shutdown,
                command = self.commands.recv() => command.map_or(Step::Shutdown, Step::Command),
                () = tokio::time::sleep_until(reconnect_at.unwrap_or_else(Instant::now)),
                    if reconnect_at.is_some() => Step::ReconnectDue,
            };
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Step::Shutdown,
            command = self.commands.recv() => command.map_or(Step::Shutdown, Step::Command),
            event = connection.heartbeat_rx.recv() => {
                Step::Heartbeat(event.unwrap_or(HeartbeatEvent::Timeout))
            }
            message = connection.read.next() => Step::Inbound(message),
        }
    }

    // -------------------------------------------------------------------------
    // Connect / disconnect
    // -------------------------------------------------------------------------

    async fn connect(&mut self) {
        match self.open_connection().await {
            Ok(Some(connection)) => {
                self.connection = Some(connection);
                self.policy.reset();
                self.status.record_connected();
                tracing::info!(url = %self.config.url, "Connected to KIS stream");
                self.resubscribe_all().await;
            }
            Ok(None) => {}
            Err(e) => self.schedule_reconnect(&e),
        }
    }

    async fn open_connection(&self) -> Result<Option<Connection>, UpstreamError> {
        // No point in a handshake without a key. Frames read it from the
        // provider again when they are sent.
        tokio::select! {
            () = self.cancel.cancelled() => return Ok(None),
            key = self.credentials.approval_key() => {
                key?;
            }
        }

        tracing::info!(url = %self.config.url, "Connecting to KIS stream");
        let started = std::time::Instant::now();
        let handshake = tokio::time::timeout(
            self.config.handshake_timeout,
            connect_async(self.config.url.as_str()),
        );

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(None),
            result = handshake => result
                .map_err(|_| UpstreamError::HandshakeTimeout(self.config.handshake_timeout))??,
        };
        metrics::record_handshake_duration(started.elapsed());

        let (write, read) = ws_stream.split();

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(8);
        let heartbeat_cancel = self.cancel.child_token();
        tokio::spawn(
            HeartbeatMonitor::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );

        Ok(Some(Connection {
            write,
            read,
            subscribed: HashSet::new(),
            heartbeat_state,
            heartbeat_rx,
            heartbeat_cancel,
        }))
    }

    async fn resubscribe_all(&mut self) {
        let symbols = self.registry.active_symbols();
        if symbols.is_empty() {
            return;
        }

        tracing::info!(count = symbols.len(), "Restoring upstream subscriptions");
        for symbol in symbols {
            if let Err(e) = self.send_subscription(TrType::Subscribe, &symbol).await {
                self.drop_connection(&e);
                return;
            }
        }
    }

    /// Drop the connection without a close handshake and arm the reconnect.
    fn drop_connection(&mut self, error: &UpstreamError) {
        self.connection = None;
        self.status.set_subscribed(0);
        self.schedule_reconnect(error);
    }

    /// Close the connection gracefully, if there is one.
    async fn close_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.write.close().await {
                tracing::debug!(error = %e, "Error closing upstream socket");
            }
            self.status.set_subscribed(0);
        }
    }

    fn schedule_reconnect(&mut self, error: &UpstreamError) {
        self.status.set_state(ConnectionState::Disconnected);
        self.status.record_error(error);
        metrics::record_upstream_error(error.kind());

        if self.cancel.is_cancelled() {
            return;
        }

        let delay = self.policy.next_delay();
        let attempt = self.policy.attempt_count();
        self.status.reconnect_attempts.store(attempt, Ordering::Relaxed);
        metrics::record_reconnect();

        tracing::warn!(
            error = %error,
            attempt,
            delay_ms = delay.as_millis(),
            "Upstream connection lost, reconnecting"
        );
        self.reconnect_at = Some(Instant::now() + delay);
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    async fn apply_command(&mut self, command: UpstreamCommand) {
        match command {
            UpstreamCommand::EnsureConnected => {
                if self.connection.is_none() {
                    self.reconnect_at = None;
                    self.status.set_state(ConnectionState::Connecting);
                    self.connect().await;
                }
            }
            UpstreamCommand::Subscribe(symbol) => {
                let subscribed = self
                    .connection
                    .as_ref()
                    .is_some_and(|c| c.subscribed.contains(&symbol));
                if subscribed || !self.registry.has_listeners(&symbol) {
                    tracing::trace!(symbol = %symbol, "Subscribe already satisfied");
                    return;
                }
                match self.send_subscription(TrType::Subscribe, &symbol).await {
                    Ok(()) => tracing::info!(symbol = %symbol, "Subscribed upstream"),
                    Err(UpstreamError::NotConnected) => {
                        tracing::debug!(symbol = %symbol, "Subscribe deferred until reconnect");
                    }
                    Err(e) => self.drop_connection(&e),
                }
            }
            UpstreamCommand::Unsubscribe(symbol) => {
                let subscribed = self
                    .connection
                    .as_ref()
                    .is_some_and(|c| c.subscribed.contains(&symbol));
                if !subscribed || self.registry.has_listeners(&symbol) {
                    tracing::trace!(symbol = %symbol, "Unsubscribe already satisfied");
                    return;
                }
                match self.send_subscription(TrType::Unsubscribe, &symbol).await {
                    Ok(()) => tracing::info!(symbol = %symbol, "Unsubscribed upstream"),
                    Err(UpstreamError::NotConnected) => {}
                    Err(e) => self.drop_connection(&e),
                }
            }
        }
    }

    async fn send_subscription(
        &mut self,
        tr_type: TrType,
        symbol: &str,
    ) -> Result<(), UpstreamError> {
        if self.connection.is_none() {
            return Err(UpstreamError::NotConnected);
        }
        let approval_key = self.credentials.approval_key().await?;

        let connection = self.connection.as_mut().ok_or(UpstreamError::NotConnected)?;
        let text = self
            .codec
            .encode_subscription(&approval_key, tr_type, symbol)?;
        connection.write.send(Message::Text(text.into())).await?;

        match tr_type {
            TrType::Subscribe => connection.subscribed.insert(symbol.to_owned()),
            TrType::Unsubscribe => connection.subscribed.remove(symbol),
        };
        self.status.set_subscribed(connection.subscribed.len());
        Ok(())
    }

    async fn send_message(&mut self, message: Message) -> Result<(), UpstreamError> {
        let connection = self.connection.as_mut().ok_or(UpstreamError::NotConnected)?;
        connection.write.send(message).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    async fn handle_inbound(
        &mut self,
        message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) {
        if let Some(connection) = &self.connection {
            connection.heartbeat_state.record_activity();
        }

        match message {
            Some(Ok(Message::Text(text))) => {
                self.status.record_frame();
                self.handle_text(text.as_str()).await;
            }
            Some(Ok(Message::Ping(data))) => {
                if let Err(e) = self.send_message(Message::Pong(data)).await {
                    self.drop_connection(&e);
                }
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(frame = ?frame, "KIS stream sent close frame");
                self.drop_connection(&UpstreamError::ConnectionClosed);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => self.drop_connection(&e.into()),
            None => {
                tracing::info!("KIS stream ended");
                self.drop_connection(&UpstreamError::ConnectionClosed);
            }
        }
    }

    async fn handle_text(&mut self, text: &str) {
        match self.codec.decode(text) {
            Ok(UpstreamFrame::Heartbeat) => {
                metrics::record_upstream_frame(FrameKind::Heartbeat);
                tracing::trace!("Echoing upstream heartbeat");
                let pong = Message::Pong(text.as_bytes().to_vec().into());
                if let Err(e) = self.send_message(pong).await {
                    self.drop_connection(&e);
                }
            }
            Ok(UpstreamFrame::Control(frame)) if frame.is_failure() => {
                metrics::record_upstream_frame(FrameKind::Control);
                let body = frame.body.unwrap_or_default();
                tracing::error!(
                    tr_id = %frame.header.tr_id,
                    rt_cd = %body.rt_cd,
                    msg_cd = %body.msg_cd,
                    msg = %body.msg1,
                    "KIS stream rejected request"
                );
                self.close_connection().await;
                self.credentials.invalidate_approval_key().await;
                self.schedule_reconnect(&UpstreamError::Rejected {
                    code: body.msg_cd,
                    message: body.msg1,
                });
            }
            Ok(UpstreamFrame::Control(frame)) => {
                metrics::record_upstream_frame(FrameKind::Control);
                let body = frame.body.unwrap_or_default();
                tracing::debug!(
                    tr_id = %frame.header.tr_id,
                    tr_key = ?frame.header.tr_key,
                    msg = %body.msg1,
                    "KIS control frame"
                );
            }
            Ok(UpstreamFrame::Ticks(ticks)) => {
                metrics::record_upstream_frame(FrameKind::Data);
                for tick in &ticks {
                    let listeners = self.registry.dispatch(tick);
                    tracing::trace!(symbol = %tick.symbol, price = %tick.price, listeners, "Tick");
                }
            }
            Ok(UpstreamFrame::Ignored) => {
                metrics::record_upstream_frame(FrameKind::Ignored);
            }
            Err(e) => {
                metrics::record_upstream_frame(FrameKind::Malformed);
                tracing::warn!(error = %e, "Failed to decode upstream frame");
            }
        }
    }
}
