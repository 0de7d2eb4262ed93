//! Infrastructure layer for the background service.
//!
//! Contains the adapters behind the application traits: the file-backed
//! configuration store, the WebSocket listener, the HTTP collector client and
//! the settings-backed permission API.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `otel_relay_core`. The `application` layer only reaches back in for the
//! store, which it treats as its storage area.

pub mod collector;
pub mod network;
pub mod permissions;
pub mod storage;
