//! File-backed storage for the relay configuration and the service settings.

pub mod settings;
pub mod store;
