//! InstrumentationController: owns the telemetry pipeline in the main context.
//!
//! # State machine
//!
//! ```text
//!                 instrument() with an active configuration
//!  Uninstrumented ─────────────────────────────────────────► Instrumented
//!        ▲                                                        │
//!        └───────────── teardown() / Disconnect ──────────────────┘
//!
//!  ConfigurationChanged:  teardown() → merge(patch) → instrument()
//! ```
//!
//! The pipeline itself comes from a [`TelemetryPipelineFactory`] and is a
//! black box. The controller hands the factory a [`RelaySink`] as the
//! pipeline's delivery step, so encoded payloads leave through the page event
//! bus instead of the network. At most one pipeline exists at any time: the
//! old one is always torn down before a new one is built.

use std::sync::Arc;

use otel_relay_core::protocol::messages::DEFAULT_EXPORT_TIMEOUT_MS;
use otel_relay_core::{ContentConfiguration, ContentPatch, PageMessage, TelemetryKind, ToBackground};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::page_events::{PageEventListener, SessionEvents};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a payload could not be handed to the relay.
///
/// Reported to the exporter's error callback; the batch is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The payload could not be turned into a channel message.
    #[error("failed to encode {kind} payload: {reason}")]
    Encode { kind: TelemetryKind, reason: String },

    /// No bridge is listening on this session.
    #[error("no bridge relay is listening")]
    NoBridge,
}

/// A factory could not build a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("pipeline build failed: {0}")]
pub struct PipelineError(pub String);

// ── Seams ─────────────────────────────────────────────────────────────────────

/// Delivery step of a telemetry pipeline.
pub trait DeliverySink: Send + Sync {
    /// Hands one encoded batch to the transport.
    fn deliver(&self, kind: TelemetryKind, bytes: Vec<u8>) -> Result<(), RelayError>;
}

/// A running pipeline. Dropping it without `shutdown` leaks its hooks.
pub trait Pipeline: Send {
    fn shutdown(self: Box<Self>);
}

/// Builds telemetry pipelines (the SDK integration).
#[cfg_attr(test, mockall::automock)]
pub trait TelemetryPipelineFactory: Send + Sync {
    fn build(
        &self,
        config: &ContentConfiguration,
        sink: Arc<dyn DeliverySink>,
    ) -> Result<Box<dyn Pipeline>, PipelineError>;
}

// ── Relay sink ────────────────────────────────────────────────────────────────

/// [`DeliverySink`] that dispatches payloads to the session's bridge relay.
pub struct RelaySink {
    events: SessionEvents,
    timeout_ms: u64,
}

impl RelaySink {
    pub fn new(events: SessionEvents) -> Self {
        Self {
            events,
            timeout_ms: DEFAULT_EXPORT_TIMEOUT_MS,
        }
    }
}

impl DeliverySink for RelaySink {
    fn deliver(&self, kind: TelemetryKind, bytes: Vec<u8>) -> Result<(), RelayError> {
        let message = ToBackground::telemetry(kind, bytes, self.timeout_ms);
        let detail = serde_json::to_value(&message).map_err(|e| RelayError::Encode {
            kind,
            reason: e.to_string(),
        })?;
        match self.events.dispatch_to_background(detail) {
            0 => Err(RelayError::NoBridge),
            _ => Ok(()),
        }
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninstrumented,
    Instrumented,
}

/// Why [`InstrumentationController::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerExit {
    /// The bridge reported that the channel to the background closed.
    Disconnected,
    /// The page event bus went away.
    Closed,
}

pub struct InstrumentationController {
    config: ContentConfiguration,
    factory: Arc<dyn TelemetryPipelineFactory>,
    sink: Arc<RelaySink>,
    pipeline: Option<Box<dyn Pipeline>>,
    events: SessionEvents,
}

impl InstrumentationController {
    pub fn new(
        config: ContentConfiguration,
        factory: Arc<dyn TelemetryPipelineFactory>,
        events: SessionEvents,
    ) -> Self {
        Self {
            config,
            factory,
            sink: Arc::new(RelaySink::new(events.clone())),
            pipeline: None,
            events,
        }
    }

    pub fn state(&self) -> ControllerState {
        if self.pipeline.is_some() {
            ControllerState::Instrumented
        } else {
            ControllerState::Uninstrumented
        }
    }

    pub fn config(&self) -> &ContentConfiguration {
        &self.config
    }

    pub fn into_config(mut self) -> ContentConfiguration {
        self.teardown();
        std::mem::take(&mut self.config)
    }

    /// Builds a pipeline for the current configuration.
    ///
    /// Does nothing when already instrumented or when the configuration is
    /// disabled or has no instrumentations. A factory failure is logged and
    /// leaves the controller uninstrumented.
    pub fn instrument(&mut self) {
        if self.pipeline.is_some() {
            return;
        }
        if !self.config.is_active() {
            debug!(
                session = %self.events.session_id(),
                "configuration inactive, not instrumenting"
            );
            return;
        }
        // Invalid expressions are reported here, before the SDK sees them.
        let targets = self.config.propagation_targets();
        let sink: Arc<dyn DeliverySink> = self.sink.clone();
        match self.factory.build(&self.config, sink) {
            Ok(pipeline) => {
                info!(
                    session = %self.events.session_id(),
                    instrumentations = ?self.config.instrumentations,
                    propagation_targets = targets.len(),
                    "telemetry pipeline installed"
                );
                self.pipeline = Some(pipeline);
            }
            Err(e) => warn!(session = %self.events.session_id(), "{e}"),
        }
    }

    /// Shuts the pipeline down. Idempotent.
    pub fn teardown(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.shutdown();
            debug!(session = %self.events.session_id(), "telemetry pipeline removed");
        }
    }

    /// Rebuilds the pipeline with `patch` merged into the configuration.
    pub fn on_configuration_changed(&mut self, patch: &ContentPatch) {
        self.teardown();
        self.config.merge(patch);
        self.instrument();
    }

    /// Handles bridge messages from `listener` until the bridge disconnects.
    ///
    /// The pipeline is torn down before this returns.
    pub async fn run(&mut self, mut listener: PageEventListener) -> ControllerExit {
        let exit = loop {
            let Some(detail) = listener.next().await else {
                break ControllerExit::Closed;
            };
            match serde_json::from_value::<PageMessage>(detail) {
                Ok(PageMessage::ConfigurationChanged { data }) => {
                    self.on_configuration_changed(&data)
                }
                Ok(PageMessage::Disconnect) => break ControllerExit::Disconnected,
                Err(e) => warn!(session = %self.events.session_id(), "ignoring page event: {e}"),
            }
        };
        self.teardown();
        exit
    }
}

impl Drop for InstrumentationController {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
