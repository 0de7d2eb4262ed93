//! Bootstrap: injects a session and keeps re-injecting it after disconnects.
//!
//! One bootstrap round mints a session id, opens a channel to the background
//! through a [`BackgroundConnector`], and runs the bridge relay and the
//! instrumentation controller for that session until the channel closes.
//!
//! After a disconnect the next round starts after a delay from the
//! [`ReconnectPolicy`]. Consecutive failures are bounded: once
//! `max_attempts` rounds in a row fail to connect or end before the
//! stability window, the bootstrap gives up. A session that stayed up for the
//! whole window resets the count.
//!
//! ```text
//! attempt:   1      2      3      4      5
//! delay:   250ms  500ms   1s     2s     4s   … capped at max_delay
//! ```
//!
//! The configuration the controller ends a session with seeds the next one,
//! so changes received during a session survive a reconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use otel_relay_core::{ContentConfiguration, Port, SenderInfo};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::application::bridge_relay::BridgeRelay;
use crate::application::controller::{
    ControllerExit, InstrumentationController, TelemetryPipelineFactory,
};
use crate::application::page_events::{PageEventBus, SessionEvents};

// ── Errors ────────────────────────────────────────────────────────────────────

/// The transport could not open a channel to the background.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("cannot reach the background at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("handshake with the background failed: {0}")]
    Handshake(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootstrapError {
    /// Too many consecutive rounds failed.
    #[error("giving up after {attempts} consecutive failed attempt(s)")]
    GaveUp { attempts: u32 },
}

// ── Seams ─────────────────────────────────────────────────────────────────────

/// Opens the bridge's channel to the background.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackgroundConnector: Send + Sync {
    async fn connect(&self, sender: SenderInfo) -> Result<Port, TransportError>;
}

// ── Reconnect policy ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed rounds tolerated before giving up.
    pub max_attempts: u32,
    /// A session that lasted this long resets the failure count.
    pub stability_window: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            stability_window: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based): doubling, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

// ── Bootstrap ─────────────────────────────────────────────────────────────────

/// How one round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundOutcome {
    /// Connected, then the channel closed after `lasted`.
    Disconnected { lasted: Duration },
    /// The page went away; nothing left to instrument.
    PageClosed,
    ConnectFailed,
}

pub struct ContentBootstrap {
    connector: Arc<dyn BackgroundConnector>,
    factory: Arc<dyn TelemetryPipelineFactory>,
    policy: ReconnectPolicy,
    bus: PageEventBus,
    sender: SenderInfo,
    first_session: Option<Uuid>,
}

impl ContentBootstrap {
    pub fn new(
        connector: Arc<dyn BackgroundConnector>,
        factory: Arc<dyn TelemetryPipelineFactory>,
        bus: PageEventBus,
        sender: SenderInfo,
    ) -> Self {
        Self {
            connector,
            factory,
            policy: ReconnectPolicy::default(),
            bus,
            sender,
            first_session: None,
        }
    }

    /// Uses `session_id`, minted by the injector, for the first round.
    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.first_session = Some(session_id);
        self
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs sessions until the page closes or the retry budget is spent.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::GaveUp`] after `max_attempts` consecutive
    /// failed rounds.
    pub async fn run(self, config: ContentConfiguration) -> Result<(), BootstrapError> {
        let mut config = config;
        let mut failures = 0u32;
        let mut session_id = self.first_session.unwrap_or_else(Uuid::new_v4);

        loop {
            let (outcome, next_config) = self.round(session_id, config).await;
            config = next_config;
            // Every re-injection is a new session.
            session_id = Uuid::new_v4();

            match outcome {
                RoundOutcome::PageClosed => return Ok(()),
                RoundOutcome::Disconnected { lasted } if lasted >= self.policy.stability_window => {
                    failures = 0;
                }
                RoundOutcome::Disconnected { .. } | RoundOutcome::ConnectFailed => {}
            }

            failures += 1;
            if failures > self.policy.max_attempts {
                warn!(
                    tab = self.sender.tab_id,
                    "giving up on the background after {failures} attempts"
                );
                return Err(BootstrapError::GaveUp {
                    attempts: self.policy.max_attempts,
                });
            }
            let delay = self.policy.delay_for(failures);
            info!(tab = self.sender.tab_id, "re-injecting in {delay:?} (attempt {failures})");
            tokio::time::sleep(delay).await;
        }
    }

    /// One injection: connect, then relay until disconnect.
    async fn round(
        &self,
        session_id: Uuid,
        config: ContentConfiguration,
    ) -> (RoundOutcome, ContentConfiguration) {
        let span = info_span!("session", session = %session_id, tab = self.sender.tab_id);

        async move {
            let port = match self.connector.connect(self.sender.clone()).await {
                Ok(port) => port,
                Err(e) => {
                    warn!("{e}");
                    return (RoundOutcome::ConnectFailed, config);
                }
            };
            let started = Instant::now();

            let events = SessionEvents::new(session_id, self.bus.clone());
            // Both listeners exist before anything is dispatched.
            let relay = BridgeRelay::new(events.clone());
            let from_bridge = events.listen_from_background();
            let relay_task = tokio::spawn(relay.run(port).in_current_span());

            let mut controller =
                InstrumentationController::new(config, Arc::clone(&self.factory), events);
            InstrumentationController::instrument(&mut controller);
            let exit = controller.run(from_bridge).await;

            if relay_task.await.is_err() {
                warn!("bridge relay task panicked");
            }
            let outcome = match exit {
                ControllerExit::Disconnected => RoundOutcome::Disconnected {
                    lasted: started.elapsed(),
                },
                ControllerExit::Closed => RoundOutcome::PageClosed,
            };
            info!("session ended: {outcome:?}");
            (outcome, controller.into_config())
        }
        .instrument(span)
        .await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
