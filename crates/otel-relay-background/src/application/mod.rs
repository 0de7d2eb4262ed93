//! Application layer use cases for the background service.
//!
//! Use cases here orchestrate the core domain types and depend on traits for
//! everything that talks to the outside world (permission API, collector,
//! script injection), so each one can be tested with mocks.
//!
//! # Sub-modules
//!
//! - **`manage_channels`** – The registry of accepted bridge channels, keyed
//!   by `(tab, frame)`.
//!
//! - **`gate_permissions`** – Permission checks and grant/revoke syncing for
//!   the match patterns.
//!
//! - **`route_telemetry`** – Admits or gates inbound channels and forwards
//!   telemetry payloads to the collectors.
//!
//! - **`observe_storage`** – Broadcasts configuration changes to the bridges
//!   and keeps the derived pattern error lists current.
//!
//! - **`inject_scripts`** – Decides on page load whether to inject the relay.

pub mod gate_permissions;
pub mod inject_scripts;
pub mod manage_channels;
pub mod observe_storage;
pub mod route_telemetry;
