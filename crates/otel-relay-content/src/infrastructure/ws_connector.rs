//! WebSocket connector: the bridge side of the socket transport.
//!
//! Opens a WebSocket to the background, sends the `Connect` handshake, and
//! returns the bridge's end of a fresh port pair. Two tasks pump frames
//! between the socket and the other end of the pair:
//!
//! ```text
//! BridgeRelay ── Port ══ pair ══ Port ── outbound task ──► WebSocket ──► background
//!                                     ◄── inbound task  ◄──
//! ```
//!
//! Closing the bridge's port closes the socket; the socket closing
//! disconnects the port.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use otel_relay_core::{Handshake, Port, SenderInfo};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::application::bootstrap::{BackgroundConnector, TransportError};

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Connector for the background listening at `url` (`ws://host:port`).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl BackgroundConnector for WsConnector {
    async fn connect(&self, sender: SenderInfo) -> Result<Port, TransportError> {
        let (ws_stream, _) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| TransportError::Unreachable {
                    url: self.url.clone(),
                    reason: e.to_string(),
                })?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let hello = Handshake::Connect {
            sender: sender.clone(),
        };
        let text =
            serde_json::to_string(&hello).map_err(|e| TransportError::Handshake(e.to_string()))?;
        ws_tx
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        debug!("connected to {} as tab {} frame {}", self.url, sender.tab_id, sender.frame_id);

        let (local, remote) = Port::pair(sender);
        let (handle, mut receiver) = local.split();

        // Bridge → background.
        tokio::spawn(async move {
            while let Some(value) = receiver.recv().await {
                if ws_tx.send(WsMessage::Text(value.to_string())).await.is_err() {
                    debug!("WebSocket send failed (background gone)");
                    return;
                }
            }
            let _ = ws_tx.send(WsMessage::Close(None)).await;
        });

        // Background → bridge.
        tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<Value>(&text) {
                        Ok(value) => {
                            if handle.post_message(value).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("invalid JSON frame from background: {e}"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("WebSocket closed: {e}");
                        break;
                    }
                }
            }
            handle.disconnect();
        });

        Ok(remote)
    }
}
