//! Downstream WebSocket Server
//!
//! Serves `GET /ws/stock`. Every upgraded connection gets a reader loop,
//! which hands text frames to the [`SessionRouter`] in receipt order, and a
//! writer task draining the session's bounded queue, then its overflow slot.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::messages::RequestError;
use super::router::{Outbound, SessionHandle, SessionRouter};

/// Path of the price stream endpoint.
pub const STOCK_STREAM_PATH: &str = "/ws/stock";

// =============================================================================
// Server
// =============================================================================

#[derive(Clone)]
struct DownstreamState {
    router: Arc<SessionRouter>,
    queue_capacity: usize,
    cancel: CancellationToken,
}

/// Browser-facing WebSocket server.
pub struct DownstreamServer {
    port: u16,
    state: DownstreamState,
}

impl DownstreamServer {
    /// Create a server for `router`.
    ///
    /// `queue_capacity` bounds each session's outbound queue.
    #[must_use]
    pub fn new(
        port: u16,
        router: Arc<SessionRouter>,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            state: DownstreamState {
                router,
                queue_capacity: queue_capacity.max(1),
                cancel,
            },
        }
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `DownstreamServerError` if binding fails or the HTTP server
    /// stops with an error.
    pub async fn run(self) -> Result<(), DownstreamServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DownstreamServerError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `DownstreamServerError::ServerFailed` if the HTTP server stops
    /// with an error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), DownstreamServerError> {
        let port = listener.local_addr().map_or(self.port, |a| a.port());
        let cancel = self.state.cancel.clone();
        let app = Router::new()
            .route(STOCK_STREAM_PATH, get(ws_handler))
            .with_state(self.state);

        tracing::info!(port, path = STOCK_STREAM_PATH, "Downstream WebSocket server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(|e| DownstreamServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Downstream WebSocket server stopped");
        Ok(())
    }
}

// =============================================================================
// Connection Handling
// =============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<DownstreamState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: DownstreamState) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel(state.queue_capacity);

    let session = state.router.on_open(tx).await;
    let mut writer = tokio::spawn(write_loop(sink, rx, session.clone()));
    let mut writer_done = false;

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => break,
            _ = &mut writer => {
                writer_done = true;
                break;
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    state.router.on_message(&session, text.as_str()).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    state.router.reject(&session, &RequestError::BinaryMessage).await;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(session = %session.id(), error = %e, "Session read failed");
                    break;
                }
            },
        }
    }

    state.router.on_close(&session);
    // Senders are gone once the router forgets the session, so the writer
    // drains what is left and closes the socket.
    if !writer_done {
        let _ = writer.await;
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    session: SessionHandle,
) {
    loop {
        let item = tokio::select! {
            biased;
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
            () = session.overflowed() => match session.take_overflow() {
                Some(item) => item,
                None => continue,
            },
        };

        let text = match item {
            Outbound::Notice(text) => text,
            Outbound::Price { listener, payload } => {
                if !session.admits(listener) {
                    continue;
                }
                payload
            }
        };

        if let Err(e) = sink.send(Message::Text(text.into())).await {
            tracing::debug!(session = %session.id(), error = %e, "Session write failed");
            return;
        }
    }

    let _ = sink.close().await;
}

// =============================================================================
// Errors
// =============================================================================

/// Downstream server errors.
#[derive(Debug, thiserror::Error)]
pub enum DownstreamServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
