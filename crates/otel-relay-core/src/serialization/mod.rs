//! The two textual forms of a [`Configuration`](crate::Configuration).
//!
//! - [`storage`]: a flat `key → JSON value` record for the persisted store.
//!   Ordered maps are written in their tagged form so they can be told apart
//!   from plain records when read back.
//! - [`editor`]: pretty-printed JSON for a human-facing code editor. Ordered
//!   maps are flattened to plain objects so the text reads naturally.
//!
//! Both directions are all-or-nothing: a decoding failure returns a
//! [`ConfigError`] and never yields a partially applied configuration.

pub mod editor;
pub mod storage;

use serde_json::{Map, Value};
use thiserror::Error;

pub use editor::{from_editor_text, storage_items_from_editor_text, to_editor_text};
pub use storage::{
    backend_from_storage, changed_items, content_from_storage, from_storage_items,
    to_storage_items,
};

/// A flat set of storage entries, keyed by configuration key.
pub type StorageItems = Map<String, Value>;

/// Errors produced while converting a configuration to or from text.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The text is not JSON at all.
    #[error("configuration text is not valid JSON: {0}")]
    Syntax(#[source] serde_json::Error),

    /// The top-level JSON value is not an object.
    #[error("configuration must be a JSON object")]
    NotAnObject,

    /// The text names a key the configuration does not have.
    #[error("unknown configuration key {0:?}")]
    UnknownKey(String),

    /// A key holds a value of the wrong shape.
    #[error("configuration has an invalid value: {0}")]
    Shape(#[source] serde_json::Error),
}
