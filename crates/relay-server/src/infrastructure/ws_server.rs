//! WebSocket server: accept loop and per-connection tasks.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each accepted connection to WebSocket and reading the
//!    application key from the request path (`/app/{key}`).
//! 3. Registering the connection and greeting it with
//!    `pusher:connection_established`.
//! 4. Running two tasks per connection:
//!    - **Reader**: hands every text frame to the protocol handler and
//!      watches for inactivity.
//!    - **Writer**: drains the connection's outbound queue into the socket.
//! 5. Unregistering the connection when either task finishes.
//! 6. Draining every connection when the `running` flag is cleared.
//!
//! # Inactivity
//!
//! If a client sends nothing for the activity timeout, the server sends
//! `pusher:ping`.  If the next timeout also passes in silence, the socket is
//! closed with code 4201.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use relay_core::{ChannelError, PusherMessage};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};

use crate::application::ports::Transport;
use crate::domain::RelayConfig;
use crate::infrastructure::{Outbound, Relay};

/// Close code sent when a client ignores the server's `pusher:ping`.
pub const PONG_TIMEOUT_CODE: u16 = 4201;

/// How often the accept loop checks the `running` flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Time given to writer tasks to flush close frames during shutdown.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

// ── Public API ────────────────────────────────────────────────────────────────

/// A bound relay server, ready to [`run`](Self::run).
pub struct RelayServer {
    listener: TcpListener,
    relay: Arc<Relay>,
}

impl RelayServer {
    /// Builds the relay components and binds the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured address is invalid or the TCP
    /// listener cannot be bound (port in use, missing permission).
    pub async fn bind(config: &RelayConfig) -> anyhow::Result<Self> {
        let addr = config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;
        let relay = Arc::new(Relay::new(config));

        info!(
            "relay listening on {} with {} application(s)",
            listener.local_addr().unwrap_or(addr),
            relay.apps.len()
        );
        Ok(Self { listener, relay })
    }

    /// The address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the OS cannot report the socket address.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("listener has no local address")
    }

    /// Shared handle to the relay components, e.g. for the trigger API or
    /// the statistics flush.
    pub fn relay(&self) -> Arc<Relay> {
        Arc::clone(&self.relay)
    }

    /// Accepts connections until `running` is set to `false`, then drains.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept errors are logged and the
    /// loop continues.
    pub async fn run(self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    debug!("new connection from {peer_addr}");
                    let relay = Arc::clone(&self.relay);
                    tokio::spawn(async move {
                        handle_connection(stream, peer_addr, relay).await;
                    });
                }
                Ok(Err(e)) => {
                    // Transient accept error (e.g. too many open file descriptors).
                    error!("accept error: {e}");
                }
                Err(_) => {
                    // No new connection within the poll window.
                }
            }
        }

        let closed = self.relay.drain();
        if closed > 0 {
            tokio::time::sleep(DRAIN_GRACE).await;
        }
        Ok(())
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, relay: Arc<Relay>) {
    match run_connection(stream, peer_addr, relay).await {
        Ok(()) => debug!("connection {peer_addr} closed"),
        Err(e) => warn!("connection {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    relay: Arc<Relay>,
) -> anyhow::Result<()> {
    // ── Step 1: handshake, capturing the request path ─────────────────────────
    let mut path = String::new();
    let ws_stream = accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            path = request.uri().path().to_string();
            Ok(response)
        },
    )
    .await
    .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // ── Step 2: register under the application key ────────────────────────────
    let opened = app_key_from_path(&path)
        .ok_or_else(|| ChannelError::not_found("application", path.as_str()))
        .and_then(|key| relay.protocol.open(key));
    let connection = match opened {
        Ok(connection) => connection,
        Err(e) => {
            info!("rejecting {peer_addr} on {path}: {e}");
            let frame = serde_json::to_string(&PusherMessage::error(&e))?;
            ws_tx.send(WsMessage::Text(frame)).await.ok();
            ws_tx.send(close_message(e.code(), &e.to_string())).await.ok();
            return Ok(());
        }
    };
    let socket_id = connection.socket_id().clone();
    let mut outbound = relay.queues.attach(&socket_id);
    relay.protocol.greet(&connection);
    info!(
        "connection {socket_id} from {peer_addr} joined app {}",
        connection.app_id()
    );

    // ── Writer task: outbound queue → socket ──────────────────────────────────
    let writer_id = socket_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            let message = match item {
                Outbound::Frame(frame) => WsMessage::Text(frame.as_str().to_string()),
                Outbound::Close { code, reason } => {
                    ws_tx.send(close_message(code, &reason)).await.ok();
                    break;
                }
            };
            if ws_tx.send(message).await.is_err() {
                debug!("connection {writer_id}: send failed (peer gone)");
                break;
            }
        }
        ws_tx.close().await.ok();
    });

    // ── Reader task: socket → protocol handler ────────────────────────────────
    let reader_relay = Arc::clone(&relay);
    let reader_id = socket_id.clone();
    let activity_timeout = relay.activity_timeout();
    let mut reader = tokio::spawn(async move {
        let mut pinged = false;
        loop {
            let next = match timeout(activity_timeout, ws_rx.next()).await {
                Ok(next) => next,
                Err(_) if !pinged => {
                    reader_relay
                        .queues
                        .send_message(&reader_id, &PusherMessage::ping());
                    pinged = true;
                    continue;
                }
                Err(_) => {
                    info!("connection {reader_id}: no pong, closing");
                    reader_relay.queues.close(
                        &reader_id,
                        PONG_TIMEOUT_CODE,
                        "Pong reply not received",
                    );
                    break;
                }
            };
            pinged = false;

            match next {
                Some(Ok(WsMessage::Text(text))) => {
                    // Errors were already reported to the client.
                    let _ = reader_relay.protocol.handle_text(&connection, &text);
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    warn!("connection {reader_id}: unexpected binary frame (ignored)");
                }
                Some(Ok(WsMessage::Close(_))) => {
                    debug!("connection {reader_id}: close frame received");
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong frames are answered by tungstenite.
                }
                Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) | None => {
                    debug!("connection {reader_id}: stream ended");
                    break;
                }
                Some(Err(e)) => {
                    warn!("connection {reader_id}: WebSocket error: {e}");
                    break;
                }
            }
        }
    });

    // ── Wait for either side to finish ────────────────────────────────────────
    tokio::select! {
        _ = &mut reader => debug!("connection {socket_id}: reader finished"),
        _ = &mut writer => debug!("connection {socket_id}: writer finished"),
    }
    reader.abort();
    relay.protocol.close(&socket_id);
    // Dropping the queue lets the writer flush what is left and exit.
    relay.queues.detach(&socket_id);
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Extracts `{key}` from `/app/{key}`.
fn app_key_from_path(path: &str) -> Option<&str> {
    let key = path.strip_prefix("/app/")?.trim_end_matches('/');
    if key.is_empty() || key.contains('/') {
        return None;
    }
    Some(key)
}

fn close_message(code: u16, reason: &str) -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
