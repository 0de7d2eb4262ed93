//! Page event bus shared by the bridge relay and the controller.
//!
//! Both scripts run in the same page but in different realms; the only thing
//! they share is the DOM, so they talk through named custom events. Every
//! event name is prefixed with the session id minted at injection, which keeps
//! two injections into the same page from hearing each other:
//!
//! ```text
//! controller ──"<session>:relay-to-background"──►  bridge relay
//! controller ◄─"<session>:relay-from-background"── bridge relay
//! ```
//!
//! Delivery mirrors `dispatchEvent`: every listener registered for a name at
//! dispatch time gets the detail, in dispatch order, and an event nobody
//! listens for is simply lost.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use otel_relay_core::protocol::messages::{relay_from_background_event, relay_to_background_event};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{trace, warn};
use uuid::Uuid;

struct Subscription {
    name: String,
    tx: mpsc::UnboundedSender<Value>,
}

/// The page's event target. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct PageEventBus {
    listeners: Arc<Mutex<Vec<Subscription>>>,
}

impl PageEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for events named `name`.
    pub fn listen(&self, name: impl Into<String>) -> PageEventListener {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions().push(Subscription {
            name: name.clone(),
            tx,
        });
        PageEventListener { name, rx }
    }

    /// Delivers `detail` to every live listener of `name`.
    ///
    /// Returns how many listeners received it.
    pub fn dispatch(&self, name: &str, detail: Value) -> usize {
        let mut listeners = self.subscriptions();
        // Dropped listeners are pruned lazily.
        listeners.retain(|s| !s.tx.is_closed());
        let mut delivered = 0;
        for subscription in listeners.iter().filter(|s| s.name == name) {
            if subscription.tx.send(detail.clone()).is_ok() {
                delivered += 1;
            }
        }
        trace!(event = name, delivered, "page event dispatched");
        delivered
    }

    /// The subscription list, recovered if a panicking holder poisoned the lock.
    fn subscriptions(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.listeners.lock().unwrap_or_else(|poisoned| {
            warn!("page event bus lock was poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}

/// Receives the details of one event name.
pub struct PageEventListener {
    name: String,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl PageEventListener {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next detail, in dispatch order. Never returns `None` while the bus is alive.
    pub async fn next(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

/// The two event names of one session, bound to the page's bus.
#[derive(Clone)]
pub struct SessionEvents {
    session_id: Uuid,
    bus: PageEventBus,
    to_background: String,
    from_background: String,
}

impl SessionEvents {
    pub fn new(session_id: Uuid, bus: PageEventBus) -> Self {
        let id = session_id.to_string();
        Self {
            session_id,
            bus,
            to_background: relay_to_background_event(&id),
            from_background: relay_from_background_event(&id),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn bus(&self) -> &PageEventBus {
        &self.bus
    }

    /// Controller side: hand a detail to the bridge.
    pub fn dispatch_to_background(&self, detail: Value) -> usize {
        self.bus.dispatch(&self.to_background, detail)
    }

    /// Bridge side: hand a detail to the controller.
    pub fn dispatch_from_background(&self, detail: Value) -> usize {
        self.bus.dispatch(&self.from_background, detail)
    }

    /// Bridge side: what the controller sends.
    pub fn listen_to_background(&self) -> PageEventListener {
        self.bus.listen(self.to_background.clone())
    }

    /// Controller side: what the bridge sends.
    pub fn listen_from_background(&self) -> PageEventListener {
        self.bus.listen(self.from_background.clone())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
