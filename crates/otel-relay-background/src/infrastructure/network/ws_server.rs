//! WebSocket server: the transport bridges use to open channels.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each accepted connection to a WebSocket session.
//! 3. Reading the `Connect` handshake that carries the sender's identity.
//! 4. Creating a port pair, handing one end to the [`Router`], and pumping
//!    frames between the socket and the other end until either side closes.
//!
//! # Frame format
//!
//! ```text
//! bridge → background   {"type":"Connect","sender":{...}}     exactly once, first
//! bridge → background   {"type":"OTLPTraceMessage",...}       any number
//! background → bridge   {"type":"StorageChanged",...}         any number
//! ```
//!
//! All frames are WebSocket text frames holding one JSON value. Gated
//! connections are pumped like any other; the router simply never acts on
//! what arrives.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{bail, Context};
use futures_util::{SinkExt, Stream, StreamExt};
use otel_relay_core::{Handshake, Port};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::application::route_telemetry::{Admission, Router};

/// How long a new socket may take to send its `Connect` frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the WebSocket listener.
///
/// # Errors
///
/// Returns an error if the address cannot be bound (e.g. the port is in use).
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))
}

/// Runs the accept loop on `listener` until `running` is set to `false`.
pub async fn run_server(
    listener: TcpListener,
    router: Arc<Router>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("relay listening on ws://{addr}");
    }

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Short timeout so the loop can notice the shutdown flag while idle.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new bridge connection from {peer_addr}");
                let router = Arc::clone(&router);
                tokio::spawn(
                    handle_session(stream, peer_addr, router)
                        .instrument(info_span!("session", peer = %peer_addr)),
                );
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }

    Ok(())
}

// ── Per-session handler ───────────────────────────────────────────────────────

async fn handle_session(stream: TcpStream, peer_addr: SocketAddr, router: Arc<Router>) {
    match run_session(stream, peer_addr, router).await {
        Ok(()) => debug!("session {peer_addr} closed normally"),
        Err(e) => warn!("session {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<Router>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let Handshake::Connect { sender } = timeout(HANDSHAKE_TIMEOUT, read_handshake(&mut ws_rx))
        .await
        .with_context(|| {
            format!("session {peer_addr}: no Connect frame within {HANDSHAKE_TIMEOUT:?}")
        })??;
    debug!(
        "session {peer_addr}: tab {} frame {} at {}",
        sender.tab_id, sender.frame_id, sender.url
    );

    let (local, remote) = Port::pair(sender);
    if router.accept(remote).await == Admission::Gated {
        debug!("session {peer_addr}: gated; frames will be ignored");
    }
    let (handle, mut receiver) = local.split();

    // Background → bridge.
    let outbound = tokio::spawn(async move {
        while let Some(value) = receiver.recv().await {
            if ws_tx.send(WsMessage::Text(value.to_string())).await.is_err() {
                debug!("WebSocket send failed (bridge disconnected)");
                return;
            }
        }
        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    // Bridge → background.
    loop {
        let frame = match ws_rx.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) | None => break,
            Some(Err(e)) => {
                warn!("session {peer_addr}: WebSocket error: {e}");
                break;
            }
        };
        match frame {
            WsMessage::Text(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => {
                    if handle.post_message(value).is_err() {
                        debug!("session {peer_addr}: channel closed by background");
                        break;
                    }
                }
                Err(e) => warn!("session {peer_addr}: invalid JSON frame: {e}"),
            },
            WsMessage::Binary(_) => warn!("session {peer_addr}: unexpected binary frame (ignored)"),
            WsMessage::Close(_) => break,
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
        }
    }

    handle.disconnect();
    let _ = outbound.await;
    Ok(())
}

/// Waits for the `Connect` frame, skipping control frames.
async fn read_handshake<S>(ws_rx: &mut S) -> anyhow::Result<Handshake>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        match ws_rx.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                return serde_json::from_str(&text)
                    .context("first frame is not a Connect handshake");
            }
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
            Some(Ok(other)) => bail!("expected a Connect text frame, got {other:?}"),
            Some(Err(e)) => return Err(e).context("WebSocket error before handshake"),
            None => bail!("connection closed before handshake"),
        }
    }
}
