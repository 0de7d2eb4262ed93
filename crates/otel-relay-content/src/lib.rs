//! # otel-relay-content
//!
//! The two content-side scripts of the telemetry relay, as tokio tasks:
//!
//! ```text
//! ┌──────────────── page ────────────────┐
//! │ InstrumentationController            │
//! │   pipeline ─► RelaySink ─┐           │
//! │                          ▼ page events (session-scoped)
//! │ BridgeRelay ◄────────────┘           │
//! └──────┬───────────────────────────────┘
//!        │ Channel<ToBackground, FromBackground>
//!        ▼
//!   background service
//! ```
//!
//! The controller and the bridge never share state; everything between them
//! goes over the [`PageEventBus`](application::page_events::PageEventBus).

pub mod application;
pub mod infrastructure;

pub use application::bootstrap::{
    BackgroundConnector, BootstrapError, ContentBootstrap, ReconnectPolicy, TransportError,
};
pub use application::bridge_relay::BridgeRelay;
pub use application::controller::{
    ControllerExit, ControllerState, DeliverySink, InstrumentationController, Pipeline,
    PipelineError, RelayError, RelaySink, TelemetryPipelineFactory,
};
pub use application::page_events::{PageEventBus, PageEventListener, SessionEvents};
pub use infrastructure::WsConnector;
