//! Storage form: one entry per configuration key, ordered maps tagged.

use serde_json::Value;

use crate::domain::configuration::{
    BackendConfiguration, Configuration, ContentConfiguration, BACKEND_KEYS, CONTENT_KEYS,
};
use crate::serialization::{ConfigError, StorageItems};

/// Converts `config` into storage entries, one per key.
pub fn to_storage_items(config: &Configuration) -> Result<StorageItems, ConfigError> {
    match serde_json::to_value(config).map_err(ConfigError::Shape)? {
        Value::Object(items) => Ok(items),
        _ => Err(ConfigError::NotAnObject),
    }
}

/// Rebuilds a full configuration from storage entries.
///
/// Missing keys take their default values; unknown keys are ignored so a store
/// shared with other writers still loads.
pub fn from_storage_items(items: &StorageItems) -> Result<Configuration, ConfigError> {
    serde_json::from_value(Value::Object(items.clone())).map_err(ConfigError::Shape)
}

/// Rebuilds only the backend slice, looking at backend keys alone.
pub fn backend_from_storage(items: &StorageItems) -> Result<BackendConfiguration, ConfigError> {
    let relevant = select(items, BACKEND_KEYS);
    Ok(from_storage_items(&relevant)?.backend)
}

/// Rebuilds only the content slice, looking at content keys alone.
pub fn content_from_storage(items: &StorageItems) -> Result<ContentConfiguration, ConfigError> {
    let relevant = select(items, CONTENT_KEYS);
    serde_json::from_value(Value::Object(relevant)).map_err(ConfigError::Shape)
}

/// Returns the entries of `next` whose value differs from `prev`.
///
/// Keys only present in `prev` are reported with a `null` value.
pub fn changed_items(prev: &StorageItems, next: &StorageItems) -> StorageItems {
    let mut changed: StorageItems = next
        .iter()
        .filter(|(key, value)| prev.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    for key in prev.keys() {
        if !next.contains_key(key) {
            changed.insert(key.clone(), Value::Null);
        }
    }
    changed
}

fn select(items: &StorageItems, keys: &[&str]) -> StorageItems {
    items
        .iter()
        .filter(|(key, _)| keys.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
