//! BridgeRelay: the bridge context's half of the relay.
//!
//! The bridge is the only content-side component allowed to talk to the
//! background. For one session it:
//!
//! 1. Binds the port it was given as a `Channel<ToBackground, FromBackground>`.
//! 2. Forwards every `<session>:relay-to-background` detail over the channel.
//! 3. Reduces each `StorageChanged` to the content slice and re-dispatches it
//!    as `ConfigurationChanged` on `<session>:relay-from-background`.
//! 4. When the channel closes, dispatches `Disconnect` exactly once and
//!    returns.
//!
//! ```text
//!  page events                    channel
//!  ─────────────────────────────  ─────────────────────────────
//!  relay-to-background   ──────►  ToBackground
//!  relay-from-background ◄──────  StorageChanged (reduced)
//!  relay-from-background ◄──────  closed  →  Disconnect
//! ```
//!
//! Nothing here ever fails outward: undecodable details, send failures after
//! the channel closed, and malformed configuration values are all logged.

use otel_relay_core::protocol::channel::ChannelSender;
use otel_relay_core::{
    Channel, ChannelError, ContentPatch, FromBackground, PageMessage, Port, ToBackground,
};
use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::application::page_events::{PageEventListener, SessionEvents};

pub struct BridgeRelay {
    events: SessionEvents,
    outbound: PageEventListener,
}

impl BridgeRelay {
    /// Creates the relay and starts listening for page telemetry right away,
    /// so nothing the controller dispatches after this call is lost.
    pub fn new(events: SessionEvents) -> Self {
        let outbound = events.listen_to_background();
        Self { events, outbound }
    }

    /// Relays between `port` and the page until the channel closes.
    pub async fn run(self, port: Port) {
        let Self {
            events,
            mut outbound,
        } = self;
        let session = events.session_id();
        let span = info_span!("bridge", %session, tab = port.sender().tab_id);
        let (sender, receiver) = Channel::<ToBackground, FromBackground>::new(port).split();
        info!("bridge relay connected as {}", sender.id());

        let forward = {
            let sender = sender.clone();
            async move {
                while let Some(detail) = outbound.next().await {
                    forward_detail(&sender, detail);
                }
            }
        };

        let inbound = receiver.listen(
            |message| on_background_message(&events, &sender, message),
            || debug!("channel to background closed"),
        );

        async {
            tokio::select! {
                () = inbound => {}
                () = forward => debug!("page event bus closed"),
            }
        }
        .instrument(span.clone())
        .await;

        sender.disconnect();
        let detail = to_detail(&PageMessage::Disconnect);
        let listeners = events.dispatch_from_background(detail);
        span.in_scope(|| info!("bridge relay disconnected ({listeners} listener(s) notified)"));
    }
}

fn forward_detail(sender: &ChannelSender<ToBackground>, detail: Value) {
    let message = match serde_json::from_value::<ToBackground>(detail) {
        Ok(message) => message,
        Err(e) => {
            warn!("ignoring page event that is not a telemetry message: {e}");
            return;
        }
    };
    let kind = message.kind();
    match sender.send(&message) {
        Ok(()) => debug!(%kind, bytes = message.bytes().len(), "forwarded to background"),
        Err(ChannelError::Disconnected) => {
            warn!(%kind, "channel closed, telemetry dropped")
        }
        Err(e) => warn!(%kind, "could not forward telemetry: {e}"),
    }
}

fn on_background_message(
    events: &SessionEvents,
    sender: &ChannelSender<ToBackground>,
    message: FromBackground,
) {
    match message {
        FromBackground::StorageChanged { changes } => match ContentPatch::from_changes(&changes) {
            Ok(patch) if patch.is_empty() => {
                debug!("storage change has no content keys, not forwarded")
            }
            Ok(patch) => {
                let detail = to_detail(&PageMessage::ConfigurationChanged { data: patch });
                events.dispatch_from_background(detail);
            }
            Err(e) => warn!("ignoring malformed configuration change: {e}"),
        },
        // Closing our end ends the receive loop; `run` then notifies the page.
        FromBackground::Disconnect => sender.disconnect(),
    }
}

fn to_detail(message: &PageMessage) -> Value {
    serde_json::to_value(message).unwrap_or(Value::Null)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
