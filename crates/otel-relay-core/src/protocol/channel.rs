//! Duplex ports and the typed channel built on top of them.
//!
//! A [`Port`] is one end of a duplex connection that carries structured JSON
//! values, the Rust counterpart of a structured-clone message port. Ports are
//! created in connected pairs with [`Port::pair`]; transports such as the
//! WebSocket server create a pair and pump frames between the socket and one of
//! the ends.
//!
//! A [`Channel`] wraps a port with a message type for each direction, so the
//! bridge can only send [`ToBackground`](super::ToBackground) and the
//! background can only send [`FromBackground`](super::FromBackground).
//!
//! # Lifecycle
//!
//! ```text
//! pair() ──► connected ──disconnect() by either end──► closed
//! ```
//!
//! - Within one port, frames are delivered in FIFO order.
//! - When the peer disconnects, frames it sent before disconnecting are still
//!   delivered, then the receive loop ends.
//! - When this end disconnects, receiving stops immediately.
//! - Sending on a closed port returns [`ChannelError::Disconnected`]; callers
//!   treat that as a silent drop.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors raised by port and channel operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// Either end has disconnected; the frame was not delivered.
    #[error("channel is disconnected")]
    Disconnected,

    /// The outgoing message could not be converted to a structured value.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Identity of the context that opened a port.
///
/// The background relies on this to gate and register connections: `url` is
/// matched against the stored match patterns, and `(tab_id, frame_id)` keys the
/// channel registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    /// Port name chosen by the opener.
    pub name: String,
    /// Browser tab the opener runs in.
    pub tab_id: i32,
    /// Frame within the tab (0 is the top frame).
    pub frame_id: i32,
    /// URL of the document that opened the port.
    pub url: String,
}

#[derive(Debug)]
enum Frame {
    Message(Value),
    Disconnect,
}

// ── Port ──────────────────────────────────────────────────────────────────────

/// One end of a duplex structured-value connection.
pub struct Port {
    handle: PortHandle,
    receiver: PortReceiver,
}

/// Cloneable sending half of a [`Port`].
#[derive(Clone)]
pub struct PortHandle {
    id: Uuid,
    sender: Arc<SenderInfo>,
    outbound: mpsc::UnboundedSender<Frame>,
    local_closed: Arc<AtomicBool>,
    remote_closed: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

/// Receiving half of a [`Port`].
pub struct PortReceiver {
    inbound: mpsc::UnboundedReceiver<Frame>,
    local_closed: Arc<AtomicBool>,
    remote_closed: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Port {
    /// Creates two connected ends sharing the same connection id and sender info.
    pub fn pair(sender: SenderInfo) -> (Port, Port) {
        let id = Uuid::new_v4();
        let sender = Arc::new(sender);
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a_closed = Arc::new(AtomicBool::new(false));
        let b_closed = Arc::new(AtomicBool::new(false));

        let a = Port::assemble(id, Arc::clone(&sender), a_tx, a_rx, &a_closed, &b_closed);
        let b = Port::assemble(id, sender, b_tx, b_rx, &b_closed, &a_closed);
        (a, b)
    }

    fn assemble(
        id: Uuid,
        sender: Arc<SenderInfo>,
        outbound: mpsc::UnboundedSender<Frame>,
        inbound: mpsc::UnboundedReceiver<Frame>,
        local_closed: &Arc<AtomicBool>,
        remote_closed: &Arc<AtomicBool>,
    ) -> Port {
        let wake = Arc::new(Notify::new());
        Port {
            handle: PortHandle {
                id,
                sender,
                outbound,
                local_closed: Arc::clone(local_closed),
                remote_closed: Arc::clone(remote_closed),
                wake: Arc::clone(&wake),
            },
            receiver: PortReceiver {
                inbound,
                local_closed: Arc::clone(local_closed),
                remote_closed: Arc::clone(remote_closed),
                wake,
            },
        }
    }

    pub fn id(&self) -> Uuid {
        self.handle.id
    }

    pub fn sender(&self) -> &SenderInfo {
        &self.handle.sender
    }

    pub fn handle(&self) -> &PortHandle {
        &self.handle
    }

    pub fn post_message(&self, value: Value) -> Result<(), ChannelError> {
        self.handle.post_message(value)
    }

    pub fn disconnect(&self) {
        self.handle.disconnect();
    }

    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    /// Splits the port so one task can receive while others send.
    pub fn split(self) -> (PortHandle, PortReceiver) {
        (self.handle, self.receiver)
    }
}

impl PortHandle {
    /// Connection id shared by both ends of the pair.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sender(&self) -> &SenderInfo {
        &self.sender
    }

    /// Returns `true` while neither end has disconnected.
    pub fn is_connected(&self) -> bool {
        !self.local_closed.load(Ordering::Acquire)
            && !self.remote_closed.load(Ordering::Acquire)
            && !self.outbound.is_closed()
    }

    /// Queues a structured value for the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Disconnected`] once either end has disconnected.
    pub fn post_message(&self, value: Value) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Disconnected);
        }
        self.outbound
            .send(Frame::Message(value))
            .map_err(|_| ChannelError::Disconnected)
    }

    /// Closes this end. Idempotent; only the first call notifies the peer.
    pub fn disconnect(&self) {
        if self.local_closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outbound.send(Frame::Disconnect);
        self.wake.notify_one();
    }
}

impl PortReceiver {
    /// Waits for the next value from the peer.
    ///
    /// Returns `None` once either end has disconnected or the peer was dropped.
    pub async fn recv(&mut self) -> Option<Value> {
        if self.local_closed.load(Ordering::Acquire) {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.wake.notified() => None,
            frame = self.inbound.recv() => match frame {
                Some(Frame::Message(value)) => Some(value),
                Some(Frame::Disconnect) | None => {
                    self.remote_closed.store(true, Ordering::Release);
                    None
                }
            },
        }
    }
}

// ── Typed channel ─────────────────────────────────────────────────────────────

/// A port with a message type for each direction.
///
/// `Tx` is what this end sends, `Rx` is what it receives.
pub struct Channel<Tx, Rx> {
    sender: ChannelSender<Tx>,
    receiver: ChannelReceiver<Rx>,
}

/// Cloneable typed sending half of a [`Channel`].
pub struct ChannelSender<Tx> {
    handle: PortHandle,
    _marker: PhantomData<fn(Tx)>,
}

impl<Tx> Clone for ChannelSender<Tx> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _marker: PhantomData,
        }
    }
}

/// Typed receiving half of a [`Channel`].
pub struct ChannelReceiver<Rx> {
    receiver: PortReceiver,
    connection: Uuid,
    _marker: PhantomData<fn() -> Rx>,
}

impl<Tx: Serialize, Rx: DeserializeOwned> Channel<Tx, Rx> {
    /// Binds a typed channel to an already connected port.
    pub fn new(port: Port) -> Self {
        let connection = port.id();
        let (handle, receiver) = port.split();
        Self {
            sender: ChannelSender {
                handle,
                _marker: PhantomData,
            },
            receiver: ChannelReceiver {
                receiver,
                connection,
                _marker: PhantomData,
            },
        }
    }

    pub fn sender_info(&self) -> &SenderInfo {
        self.sender.handle.sender()
    }

    pub fn send(&self, message: &Tx) -> Result<(), ChannelError> {
        self.sender.send(message)
    }

    pub async fn recv(&mut self) -> Option<Rx> {
        self.receiver.recv().await
    }

    pub fn disconnect(&self) {
        self.sender.disconnect();
    }

    pub fn split(self) -> (ChannelSender<Tx>, ChannelReceiver<Rx>) {
        (self.sender, self.receiver)
    }
}

impl<Tx: Serialize> ChannelSender<Tx> {
    /// Serializes `message` and queues it for the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Disconnected`] after either end disconnected and
    /// [`ChannelError::Encode`] if `message` cannot be represented as JSON.
    pub fn send(&self, message: &Tx) -> Result<(), ChannelError> {
        let value =
            serde_json::to_value(message).map_err(|e| ChannelError::Encode(e.to_string()))?;
        self.handle.post_message(value)
    }

    pub fn disconnect(&self) {
        self.handle.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    pub fn sender_info(&self) -> &SenderInfo {
        self.handle.sender()
    }
}

impl<Rx: DeserializeOwned> ChannelReceiver<Rx> {
    /// Waits for the next message that decodes as `Rx`.
    ///
    /// Frames of the wrong shape are logged and skipped.
    pub async fn recv(&mut self) -> Option<Rx> {
        loop {
            let value = self.receiver.recv().await?;
            match serde_json::from_value::<Rx>(value) {
                Ok(message) => return Some(message),
                Err(e) => warn!(connection = %self.connection, "dropping undecodable frame: {e}"),
            }
        }
    }

    /// Drives the receive loop, calling `on_message` for every message in
    /// arrival order and `on_disconnect` exactly once when the channel closes.
    pub async fn listen<M, D>(mut self, mut on_message: M, on_disconnect: D)
    where
        M: FnMut(Rx),
        D: FnOnce(),
    {
        while let Some(message) = self.recv().await {
            on_message(message);
        }
        debug!(connection = %self.connection, "channel closed");
        on_disconnect();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
