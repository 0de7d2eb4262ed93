//! ManageChannels: the background's table of accepted bridge channels.
//!
//! Every channel that passed the permission gate is registered under the
//! `(tab, frame)` of its sender. Only registered channels receive
//! configuration broadcasts.
//!
//! # Entry lifecycle
//!
//! ```text
//! register(tab 4, frame 0, conn A)   { (4,0) → A }
//! register(tab 4, frame 0, conn B)   { (4,0) → B }     stale A overwritten
//! unregister((4,0), conn A)          { (4,0) → B }     late disconnect of A is ignored
//! unregister((4,0), conn B)          { }
//! ```
//!
//! Unregistering checks the connection id so a late disconnect of a replaced
//! channel can never remove the fresh one.

use std::collections::HashMap;

use otel_relay_core::protocol::channel::ChannelSender;
use otel_relay_core::FromBackground;
use tracing::{debug, warn};
use uuid::Uuid;

/// Sending half of an accepted channel, as seen from the background.
pub type BackgroundSender = ChannelSender<FromBackground>;

/// Registry key: the sender's tab and frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    pub tab_id: i32,
    pub frame_id: i32,
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tab {} frame {}", self.tab_id, self.frame_id)
    }
}

/// In-memory map from `(tab, frame)` to the channel currently serving it.
///
/// Owned by the router behind a mutex; only the router's connect and
/// disconnect paths mutate it.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<ChannelKey, BackgroundSender>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `channel` under the key of its sender.
    ///
    /// Returns the channel it replaced, if any. The replaced channel is not
    /// disconnected here; its own receive loop ends when the peer goes away.
    pub fn register(&mut self, channel: BackgroundSender) -> Option<BackgroundSender> {
        let sender = channel.sender_info();
        let key = ChannelKey {
            tab_id: sender.tab_id,
            frame_id: sender.frame_id,
        };
        let replaced = self.channels.insert(key, channel);
        if let Some(stale) = &replaced {
            debug!("{key}: replacing stale channel {}", stale.id());
        }
        replaced
    }

    /// Removes the entry for `key` if it still belongs to `connection`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unregister(&mut self, key: ChannelKey, connection: Uuid) -> bool {
        match self.channels.get(&key) {
            Some(current) if current.id() == connection => {
                self.channels.remove(&key);
                true
            }
            Some(_) => {
                debug!("{key}: ignoring disconnect of replaced channel {connection}");
                false
            }
            None => false,
        }
    }

    pub fn lookup(&self, key: ChannelKey) -> Option<&BackgroundSender> {
        self.channels.get(&key)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Snapshot of the registered keys, sorted.
    pub fn keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = self.channels.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Sends `message` to every registered channel and returns how many
    /// accepted it. Failed sends are logged, entries are left in place.
    pub fn broadcast(&self, message: &FromBackground) -> usize {
        let mut delivered = 0;
        for (key, channel) in &self.channels {
            match channel.send(message) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("{key}: broadcast failed: {e}"),
            }
        }
        delivered
    }
}
