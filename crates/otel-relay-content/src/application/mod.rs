//! Application layer for the content side of the relay.
//!
//! # Sub-modules
//!
//! - **`page_events`** – The page's custom-event bus and the session-scoped
//!   event names both content scripts share.
//!
//! - **`bridge_relay`** – Bridge context: owns the channel to the background
//!   and translates between it and page events.
//!
//! - **`controller`** – Main context: builds and tears down the telemetry
//!   pipeline as the configuration changes.
//!
//! - **`bootstrap`** – Runs one session per injection and re-injects after a
//!   disconnect, with bounded backoff.

pub mod bootstrap;
pub mod bridge_relay;
pub mod controller;
pub mod page_events;
