//! Editor form: pretty JSON with ordered maps flattened to plain objects.
//!
//! ```json
//! {
//!   "traceCollectorUrl": "http://localhost:4318/v1/traces",
//!   "headers": { "Authorization": "Bearer t" },
//!   ...
//! }
//! ```
//!
//! Parsing goes through [`Configuration`]'s own deserializer, which already
//! accepts plain objects wherever an ordered map is expected. Object key order
//! survives because `serde_json` is built with `preserve_order`.

use serde_json::{Map, Value};

use crate::domain::configuration::{Configuration, BACKEND_KEYS, CONTENT_KEYS, DERIVED_KEYS};
use crate::domain::ordered_map::MAP_DATA_TYPE;
use crate::serialization::storage::to_storage_items;
use crate::serialization::{ConfigError, StorageItems};

/// Renders `config` as human-editable text.
pub fn to_editor_text(config: &Configuration) -> Result<String, ConfigError> {
    let value = serde_json::to_value(config).map_err(ConfigError::Shape)?;
    serde_json::to_string_pretty(&flatten_maps(value)).map_err(ConfigError::Shape)
}

/// Parses editor text back into a configuration.
///
/// Every key must belong to the configuration and every value must have the
/// right shape; the first problem aborts the whole parse.
pub fn from_editor_text(text: &str) -> Result<Configuration, ConfigError> {
    let fields = editor_fields(text)?;
    serde_json::from_value(Value::Object(fields)).map_err(ConfigError::Shape)
}

/// Parses editor text into the storage entries it sets.
///
/// Only keys present in `text` are returned, so writing the result leaves
/// every other stored key alone. The derived pattern error lists are dropped
/// even when present. The text is validated as a whole first.
pub fn storage_items_from_editor_text(text: &str) -> Result<StorageItems, ConfigError> {
    let fields = editor_fields(text)?;
    let config: Configuration =
        serde_json::from_value(Value::Object(fields.clone())).map_err(ConfigError::Shape)?;
    let mut items = to_storage_items(&config)?;
    items.retain(|key, _| fields.contains_key(key) && !DERIVED_KEYS.contains(&key.as_str()));
    Ok(items)
}

/// Top-level fields of editor text, every key checked against the model.
fn editor_fields(text: &str) -> Result<Map<String, Value>, ConfigError> {
    let value: Value = serde_json::from_str(text).map_err(ConfigError::Syntax)?;
    let Value::Object(fields) = value else {
        return Err(ConfigError::NotAnObject);
    };
    if let Some(unknown) = fields
        .keys()
        .find(|k| !BACKEND_KEYS.contains(&k.as_str()) && !CONTENT_KEYS.contains(&k.as_str()))
    {
        return Err(ConfigError::UnknownKey(unknown.clone()));
    }
    Ok(fields)
}

/// Replaces every tagged ordered map inside `value` with a plain object.
fn flatten_maps(value: Value) -> Value {
    match value {
        Value::Object(fields) => match tagged_entries(&fields) {
            Some(entries) => Value::Object(entries),
            None => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, flatten_maps(v)))
                    .collect(),
            ),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(flatten_maps).collect()),
        other => other,
    }
}

fn tagged_entries(fields: &Map<String, Value>) -> Option<Map<String, Value>> {
    if fields.len() != 2 || fields.get("dataType")?.as_str()? != MAP_DATA_TYPE {
        return None;
    }
    let mut entries = Map::new();
    for pair in fields.get("value")?.as_array()? {
        match pair.as_array()?.as_slice() {
            [Value::String(k), v] => {
                entries.insert(k.clone(), v.clone());
            }
            _ => return None,
        }
    }
    Some(entries)
}
