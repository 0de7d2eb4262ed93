//! File-backed configuration storage with change notifications.
//!
//! The store is a flat `key → JSON value` record, the same shape the browser's
//! extension storage has. It is persisted as one pretty-printed JSON document:
//!
//! ```json
//! {
//!   "traceCollectorUrl": "http://localhost:4318/v1/traces",
//!   "headers": { "dataType": "Map", "value": [["authorization", "Bearer x"]] },
//!   "enabled": true
//! }
//! ```
//!
//! Every successful [`ConfigStore::set`] that changes at least one key
//! publishes a [`StorageChange`] on a broadcast channel. The storage observer
//! turns those into `StorageChanged` messages for the bridges.
//!
//! Writes are all-or-nothing: the document is written to a temporary file and
//! renamed into place, and the in-memory copy is only updated after the write
//! succeeded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use otel_relay_core::serialization::{
    backend_from_storage, content_from_storage, from_storage_items,
    storage_items_from_editor_text, to_storage_items, ConfigError,
};
use otel_relay_core::{BackendConfiguration, Configuration, ContentConfiguration, StorageItems};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

/// Capacity of the change broadcast; slow subscribers see `Lagged`.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing storage at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The storage file exists but is not a JSON object.
    #[error("storage file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The stored values do not form a valid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Old and new value of one storage key. `None` means absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// The keys changed by one write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageChange {
    changes: BTreeMap<String, ValueChange>,
}

impl StorageChange {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.changes.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&ValueChange> {
        self.changes.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.changes.keys().map(String::as_str)
    }

    /// New values of the changed keys; removed keys map to `null`.
    pub fn new_values(&self) -> StorageItems {
        self.changes
            .iter()
            .map(|(key, change)| (key.clone(), change.new_value.clone().unwrap_or(Value::Null)))
            .collect()
    }
}

/// The persisted configuration store.
pub struct ConfigStore {
    path: Option<PathBuf>,
    items: Mutex<StorageItems>,
    changes: broadcast::Sender<StorageChange>,
}

impl ConfigStore {
    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::with_items(None, StorageItems::new())
    }

    /// An in-memory store seeded with `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if `config` cannot be converted to
    /// storage entries.
    pub fn seeded(config: &Configuration) -> Result<Self, StoreError> {
        Ok(Self::with_items(None, to_storage_items(config)?))
    }

    fn with_items(path: Option<PathBuf>, items: StorageItems) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            path,
            items: Mutex::new(items),
            changes,
        }
    }

    /// Opens the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] for file-system errors other than "not
    /// found" and [`StoreError::Corrupt`] if the file is not a JSON object.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let items = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(items)) => items,
                Ok(_) => {
                    return Err(StoreError::Corrupt {
                        path,
                        reason: "top-level value is not an object".to_string(),
                    })
                }
                Err(e) => {
                    return Err(StoreError::Corrupt {
                        path,
                        reason: e.to_string(),
                    })
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no storage at {}; starting with defaults", path.display());
                StorageItems::new()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self::with_items(Some(path), items))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Subscribes to change notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }

    /// Snapshot of every stored entry.
    pub async fn items(&self) -> StorageItems {
        self.items.lock().await.clone()
    }

    pub async fn configuration(&self) -> Result<Configuration, StoreError> {
        Ok(from_storage_items(&*self.items.lock().await)?)
    }

    pub async fn backend(&self) -> Result<BackendConfiguration, StoreError> {
        Ok(backend_from_storage(&*self.items.lock().await)?)
    }

    pub async fn content(&self) -> Result<ContentConfiguration, StoreError> {
        Ok(content_from_storage(&*self.items.lock().await)?)
    }

    /// Writes `items` over the stored entries.
    ///
    /// Returns the keys whose value actually changed; writing identical values
    /// neither touches the file nor notifies subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if persisting fails. The stored entries are
    /// left unchanged in that case.
    pub async fn set(&self, items: StorageItems) -> Result<StorageChange, StoreError> {
        let mut current = self.items.lock().await;

        let mut change = StorageChange::default();
        let mut next = current.clone();
        for (key, value) in items {
            let old_value = next.get(&key).cloned();
            if old_value.as_ref() == Some(&value) {
                continue;
            }
            next.insert(key.clone(), value.clone());
            change.changes.insert(
                key,
                ValueChange {
                    old_value,
                    new_value: Some(value),
                },
            );
        }

        if change.is_empty() {
            return Ok(change);
        }

        if let Some(path) = &self.path {
            persist(path, &next).await?;
        }
        *current = next;
        drop(current);

        debug!(keys = ?change.keys().collect::<Vec<_>>(), "storage changed");
        // No subscribers is fine; nobody is connected yet.
        let _ = self.changes.send(change.clone());
        Ok(change)
    }

    /// Writes every key of `config`.
    pub async fn apply(&self, config: &Configuration) -> Result<StorageChange, StoreError> {
        self.set(to_storage_items(config)?).await
    }

    /// Merges editor text into the stored entries.
    ///
    /// Only the keys the text names are written; the derived pattern error
    /// lists are never taken from it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if any part of the text is invalid, in
    /// which case nothing is written.
    pub async fn apply_editor_text(&self, text: &str) -> Result<StorageChange, StoreError> {
        self.set(storage_items_from_editor_text(text)?).await
    }
}

async fn persist(path: &Path, items: &StorageItems) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| StoreError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }
    }

    let content = serde_json::to_string_pretty(items).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use otel_relay_core::domain::configuration::keys;
    use serde_json::json;
    use uuid::Uuid;

    fn items(pairs: &[(&str, Value)]) -> StorageItems {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_store_yields_default_configuration() {
        let store = ConfigStore::in_memory();
        assert_eq!(store.configuration().await.unwrap(), Configuration::default());
    }

    #[tokio::test]
    async fn test_set_reports_only_changed_keys() {
        // Arrange
        let store = ConfigStore::in_memory();
        store
            .set(items(&[(keys::ENABLED, json!(true)), (keys::EVENTS, json!(["click"]))]))
            .await
            .unwrap();

        // Act
        let change = store
            .set(items(&[(keys::ENABLED, json!(true)), (keys::EVENTS, json!(["submit"]))]))
            .await
            .unwrap();

        // Assert
        assert_eq!(change.keys().collect::<Vec<_>>(), vec![keys::EVENTS]);
        assert_eq!(
            change.get(keys::EVENTS),
            Some(&ValueChange {
                old_value: Some(json!(["click"])),
                new_value: Some(json!(["submit"])),
            })
        );
    }

    #[tokio::test]
    async fn test_subscribers_receive_changes_but_not_no_op_writes() {
        let store = ConfigStore::in_memory();
        let mut rx = store.subscribe();

        store.set(items(&[(keys::ENABLED, json!(false))])).await.unwrap();
        store.set(items(&[(keys::ENABLED, json!(false))])).await.unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.new_values(), items(&[(keys::ENABLED, json!(false))]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_apply_then_reload_from_disk() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("otel_relay_store_{}", Uuid::new_v4()));
        let path = dir.join("storage.json");
        let mut config = Configuration::default();
        config.backend.headers = [("x-b", "2"), ("x-a", "1")].into_iter().collect();

        // Act
        {
            let store = ConfigStore::open(&path).await.unwrap();
            store.apply(&config).await.unwrap();
        }
        let reopened = ConfigStore::open(&path).await.unwrap();

        // Assert
        assert_eq!(reopened.configuration().await.unwrap(), config);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_editor_text_merges_into_stored_configuration() {
        // Arrange
        let mut seeded = Configuration::default();
        seeded.backend.headers = [("x-api-key", "secret")].into_iter().collect();
        seeded.backend.trace_collector_url = "https://collector.example/v1/traces".into();
        let store = ConfigStore::seeded(&seeded).unwrap();

        // Act
        let change = store.apply_editor_text(r#"{"enabled": false}"#).await.unwrap();

        // Assert
        assert_eq!(change.keys().collect::<Vec<_>>(), vec![keys::ENABLED]);
        let config = store.configuration().await.unwrap();
        assert!(!config.content.enabled);
        assert_eq!(config.backend.headers.get("x-api-key"), Some("secret"));
        assert_eq!(
            config.backend.trace_collector_url,
            "https://collector.example/v1/traces"
        );
        assert_eq!(config.backend.match_patterns, seeded.backend.match_patterns);
    }

    #[tokio::test]
    async fn test_editor_text_cannot_write_derived_error_lists() {
        let store = ConfigStore::seeded(&Configuration::default()).unwrap();
        let text = r#"{"matchPatternErrors": [{"pattern": "x", "error": "forged"}]}"#;

        let change = store.apply_editor_text(text).await.unwrap();

        assert!(change.is_empty());
        assert!(store.backend().await.unwrap().match_pattern_errors.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_editor_text_writes_nothing() {
        // Arrange
        let store = ConfigStore::seeded(&Configuration::default()).unwrap();
        let before = store.items().await;

        // Act: the first key is fine, the second is not.
        let result = store
            .apply_editor_text(r#"{"enabled": false, "concurrencyLimit": "many"}"#)
            .await;

        // Assert
        assert!(matches!(result, Err(StoreError::Config(_))));
        assert_eq!(store.items().await, before);
    }

    #[tokio::test]
    async fn test_open_rejects_non_object_document() {
        let dir = std::env::temp_dir().join(format!("otel_relay_store_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("storage.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        let result = ConfigStore::open(&path).await;

        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_malformed_value_surfaces_as_config_error() {
        let store = ConfigStore::in_memory();
        store.set(items(&[(keys::HEADERS, json!(17))])).await.unwrap();

        assert!(matches!(store.backend().await, Err(StoreError::Config(_))));
        assert!(store.content().await.is_ok());
    }
}
