//! Shared fixtures: a fake KIS stream server and a bridge wired against it.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use kis_stream_bridge::infrastructure::kis::{
    HeartbeatConfig, ReconnectConfig, StaticCredentials, UpstreamConfig,
    UpstreamConnectionManager, UpstreamHandle, UpstreamStatus,
};
use kis_stream_bridge::{CredentialProvider, ListenerHandle, PriceTick, SubscriptionRegistry};

/// How long a test waits for something that should happen.
pub const WAIT: Duration = Duration::from_secs(5);

/// How long a test waits to conclude that something did not happen.
pub const QUIET: Duration = Duration::from_millis(300);

/// Approval key handed out by [`StaticCredentials`] in tests.
pub const APPROVAL_KEY: &str = "test-approval-key";

// =============================================================================
// Fake KIS stream
// =============================================================================

/// A local WebSocket server standing in for the vendor stream.
pub struct FakeKis {
    /// `ws://` URL of the server.
    pub url: String,
    connections: mpsc::UnboundedReceiver<FakeConnection>,
}

impl FakeKis {
    /// Bind an ephemeral port and accept connections in the background.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                if tx.send(FakeConnection::spawn(ws)).is_err() {
                    break;
                }
            }
        });

        Self { url, connections }
    }

    /// Wait for the bridge to open the next connection.
    pub async fn next_connection(&mut self) -> FakeConnection {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("no upstream connection within timeout")
            .expect("fake server stopped")
    }

    /// Assert that no new connection is opened for a while.
    pub async fn expect_no_connection(&mut self) {
        let next = tokio::time::timeout(QUIET, self.connections.recv()).await;
        assert!(next.is_err(), "unexpected upstream connection");
    }
}

/// One accepted connection. Dropping it closes the socket.
pub struct FakeConnection {
    inbound: mpsc::UnboundedReceiver<Message>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl FakeConnection {
    fn spawn<S>(ws: tokio_tungstenite::WebSocketStream<S>) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (mut write, mut read) = ws.split();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = read.next() => match message {
                        Some(Ok(message)) => {
                            let _ = inbound_tx.send(message);
                        }
                        _ => break,
                    },
                    message = outbound_rx.recv() => match message {
                        Some(message) => {
                            if write.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = write.close().await;
                            break;
                        }
                    },
                }
            }
        });

        Self { inbound, outbound }
    }

    /// Send a text frame to the bridge.
    pub fn send_text(&self, text: &str) {
        self.outbound.send(Message::Text(text.into())).unwrap();
    }

    /// Next frame of any kind, or `None` once the bridge closed the socket.
    pub async fn next_message(&mut self) -> Option<Message> {
        tokio::time::timeout(WAIT, self.inbound.recv())
            .await
            .expect("no upstream frame within timeout")
    }

    /// Next text frame, skipping transport pings and pongs.
    pub async fn next_text(&mut self) -> String {
        loop {
            match self.next_message().await {
                Some(Message::Text(text)) => return text.as_str().to_owned(),
                Some(Message::Ping(_) | Message::Pong(_)) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    /// Next subscription request as `(approval_key, tr_type, tr_key)`.
    pub async fn next_request(&mut self) -> (String, String, String) {
        let text = self.next_text().await;
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["body"]["input"]["tr_id"], "H0STCNT0");

        (
            value["header"]["approval_key"].as_str().unwrap().to_owned(),
            value["header"]["tr_type"].as_str().unwrap().to_owned(),
            value["body"]["input"]["tr_key"].as_str().unwrap().to_owned(),
        )
    }

    /// Next subscription request as `(tr_type, tr_key)`, signed with
    /// [`APPROVAL_KEY`].
    pub async fn next_subscription(&mut self) -> (String, String) {
        let (approval_key, tr_type, tr_key) = self.next_request().await;
        assert_eq!(approval_key, APPROVAL_KEY);
        (tr_type, tr_key)
    }

    /// Assert that no text frame arrives for a while.
    pub async fn expect_silence(&mut self) {
        let deadline = tokio::time::Instant::now() + QUIET;
        loop {
            match tokio::time::timeout_at(deadline, self.inbound.recv()).await {
                Err(_) => return,
                Ok(Some(Message::Ping(_) | Message::Pong(_))) => {}
                Ok(other) => panic!("unexpected upstream frame: {other:?}"),
            }
        }
    }

    /// Wait until the bridge closes the socket.
    pub async fn expect_closed(&mut self) {
        loop {
            match self.next_message().await {
                None | Some(Message::Close(_)) => return,
                Some(_) => {}
            }
        }
    }
}

/// A single-record trade frame for `symbol` at `price`.
pub fn trade_frame(symbol: &str, price: &str) -> String {
    format!("0|H0STCNT0|001|{symbol}^091500^{price}^2^300^0.42^71150.00")
}

// =============================================================================
// Bridge under test
// =============================================================================

/// Upstream timings shortened for tests.
pub fn test_upstream_config(url: &str) -> UpstreamConfig {
    UpstreamConfig {
        url: url.to_owned(),
        handshake_timeout: Duration::from_millis(300),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            multiplier: 2.0,
            jitter_factor: 0.0,
        },
        heartbeat: HeartbeatConfig::new(Duration::from_secs(30), Duration::from_secs(120)),
        connect_on_start: false,
    }
}

/// Registry and upstream worker running against `url`.
pub struct UpstreamBridge {
    pub status: Arc<UpstreamStatus>,
    pub registry: Arc<SubscriptionRegistry>,
    pub cancel: CancellationToken,
    pub worker: JoinHandle<()>,
}

impl UpstreamBridge {
    /// Spawn the worker with `config` and [`StaticCredentials`].
    pub fn start(config: UpstreamConfig) -> Self {
        Self::start_with(
            config,
            Arc::new(StaticCredentials::new(APPROVAL_KEY, "test-access-token")),
        )
    }

    /// Spawn the worker with `config` and `credentials`.
    pub fn start_with(config: UpstreamConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        let status = Arc::new(UpstreamStatus::new());
        let (handle, commands) = UpstreamHandle::channel(Arc::clone(&status));
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(handle)));
        let cancel = CancellationToken::new();

        let manager = UpstreamConnectionManager::new(
            config,
            credentials,
            Arc::clone(&registry),
            commands,
            Arc::clone(&status),
            cancel.clone(),
        );
        let worker = tokio::spawn(manager.run());

        Self {
            status,
            registry,
            cancel,
            worker,
        }
    }

    /// Register a listener on `symbol` that forwards ticks to the returned
    /// receiver.
    pub fn listen(&self, symbol: &str) -> (u64, mpsc::UnboundedReceiver<PriceTick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.registry.allocate_listener_id();
        self.registry.add_listener(
            symbol,
            ListenerHandle::new(id, move |tick: &PriceTick| {
                let _ = tx.send(tick.clone());
            }),
        );
        (id, rx)
    }
}

/// Poll `condition` until it holds or the wait expires.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within timeout"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
