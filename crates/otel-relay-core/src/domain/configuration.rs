//! The configuration model shared by every context.
//!
//! [`Configuration`] is the single source of truth. It is composed of two
//! slices:
//!
//! - [`BackendConfiguration`]: what only the background needs (collector URLs,
//!   match patterns, headers, derived validation errors).
//! - [`ContentConfiguration`]: what the instrumentation in the page needs
//!   (enable flags, instrumentation toggles, event names, propagation targets,
//!   the export concurrency limit).
//!
//! Both slices carry `attributes`. In storage the key exists once; it is copied
//! into both slices on load and taken from the content slice on save, so always
//! change it through [`Configuration::set_attributes`].
//!
//! # Storage layout
//!
//! Storage is flat: every field below is its own key, written in camelCase.
//! Missing keys fall back to their defaults, so a store written by an older
//! version still loads.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::domain::match_pattern::MatchPatternError;
use crate::domain::ordered_map::OrderedMap;

/// Storage keys, one per configuration field.
pub mod keys {
    pub const TRACE_COLLECTOR_URL: &str = "traceCollectorUrl";
    pub const LOG_COLLECTOR_URL: &str = "logCollectorUrl";
    pub const MATCH_PATTERNS: &str = "matchPatterns";
    pub const MATCH_PATTERN_ERRORS: &str = "matchPatternErrors";
    pub const MATCH_PATTERN_PERMISSION_ERRORS: &str = "matchPatternPermissionErrors";
    pub const HEADERS: &str = "headers";
    pub const ATTRIBUTES: &str = "attributes";
    pub const ENABLED: &str = "enabled";
    pub const TRACING_ENABLED: &str = "tracingEnabled";
    pub const LOGGING_ENABLED: &str = "loggingEnabled";
    pub const INSTRUMENTATIONS: &str = "instrumentations";
    pub const EVENTS: &str = "events";
    pub const PROPAGATE_TO: &str = "propagateTo";
    pub const CONCURRENCY_LIMIT: &str = "concurrencyLimit";
}

/// Keys that make up the content slice.
pub const CONTENT_KEYS: &[&str] = &[
    keys::ENABLED,
    keys::TRACING_ENABLED,
    keys::LOGGING_ENABLED,
    keys::INSTRUMENTATIONS,
    keys::EVENTS,
    keys::PROPAGATE_TO,
    keys::CONCURRENCY_LIMIT,
    keys::ATTRIBUTES,
];

/// Keys that make up the backend slice.
pub const BACKEND_KEYS: &[&str] = &[
    keys::TRACE_COLLECTOR_URL,
    keys::LOG_COLLECTOR_URL,
    keys::MATCH_PATTERNS,
    keys::MATCH_PATTERN_ERRORS,
    keys::MATCH_PATTERN_PERMISSION_ERRORS,
    keys::HEADERS,
    keys::ATTRIBUTES,
];

/// Backend keys computed by the background from `matchPatterns` and the
/// granted permissions. Never written from user input.
pub const DERIVED_KEYS: &[&str] = &[
    keys::MATCH_PATTERN_ERRORS,
    keys::MATCH_PATTERN_PERMISSION_ERRORS,
];

/// Browser instrumentations the page pipeline can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Instrumentation {
    DocumentLoad,
    Fetch,
    XmlHttpRequest,
    UserInteraction,
    Errors,
}

// ── Slices ────────────────────────────────────────────────────────────────────

/// Settings only the background process consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfiguration {
    pub trace_collector_url: String,
    pub log_collector_url: String,
    pub match_patterns: Vec<String>,
    pub headers: OrderedMap,
    /// Mirror of [`ContentConfiguration::attributes`]; never saved on its own.
    pub attributes: OrderedMap,
    pub match_pattern_errors: Vec<MatchPatternError>,
    pub match_pattern_permission_errors: Vec<MatchPatternError>,
}

/// Settings the main-context instrumentation consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentConfiguration {
    pub enabled: bool,
    pub tracing_enabled: bool,
    pub logging_enabled: bool,
    pub instrumentations: Vec<Instrumentation>,
    /// DOM event names recorded by the user-interaction instrumentation.
    pub events: Vec<String>,
    /// Regular expressions of URLs that receive trace-context headers.
    pub propagate_to: Vec<String>,
    /// Maximum number of export batches in flight at once.
    pub concurrency_limit: u32,
    pub attributes: OrderedMap,
}

impl Default for BackendConfiguration {
    fn default() -> Self {
        Self {
            trace_collector_url: "http://localhost:4318/v1/traces".to_string(),
            log_collector_url: "http://localhost:4318/v1/logs".to_string(),
            match_patterns: vec![
                "http://localhost/*".to_string(),
                "http://127.0.0.1/*".to_string(),
            ],
            headers: OrderedMap::new(),
            attributes: OrderedMap::new(),
            match_pattern_errors: Vec::new(),
            match_pattern_permission_errors: Vec::new(),
        }
    }
}

impl Default for ContentConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            tracing_enabled: true,
            logging_enabled: true,
            instrumentations: vec![
                Instrumentation::DocumentLoad,
                Instrumentation::Fetch,
                Instrumentation::XmlHttpRequest,
            ],
            events: vec!["click".to_string(), "submit".to_string()],
            propagate_to: Vec::new(),
            concurrency_limit: 50,
            attributes: OrderedMap::new(),
        }
    }
}

impl ContentConfiguration {
    /// Returns `true` when building a pipeline would install anything.
    pub fn is_active(&self) -> bool {
        self.enabled
            && !self.instrumentations.is_empty()
            && (self.tracing_enabled || self.logging_enabled)
    }

    /// Applies every field present in `patch`.
    pub fn merge(&mut self, patch: &ContentPatch) {
        if let Some(v) = patch.enabled {
            self.enabled = v;
        }
        if let Some(v) = patch.tracing_enabled {
            self.tracing_enabled = v;
        }
        if let Some(v) = patch.logging_enabled {
            self.logging_enabled = v;
        }
        if let Some(v) = &patch.instrumentations {
            self.instrumentations = v.clone();
        }
        if let Some(v) = &patch.events {
            self.events = v.clone();
        }
        if let Some(v) = &patch.propagate_to {
            self.propagate_to = v.clone();
        }
        if let Some(v) = patch.concurrency_limit {
            self.concurrency_limit = v;
        }
        if let Some(v) = &patch.attributes {
            self.attributes = v.clone();
        }
    }

    /// Compiles `propagate_to`; invalid expressions are skipped with a warning.
    pub fn propagation_targets(&self) -> Vec<Regex> {
        self.propagate_to
            .iter()
            .filter_map(|expr| match Regex::new(expr) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(expression = %expr, "ignoring invalid propagation target: {e}");
                    None
                }
            })
            .collect()
    }
}

// ── Partial content configuration ─────────────────────────────────────────────

/// A partial content slice: only the keys that changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrumentations: Option<Vec<Instrumentation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagate_to: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<OrderedMap>,
}

impl ContentPatch {
    /// Reduces a set of changed storage values to the content slice.
    ///
    /// Keys outside [`CONTENT_KEYS`] are dropped before decoding, so a
    /// malformed backend value can never poison the content update.
    ///
    /// # Errors
    ///
    /// Returns the decoding error if a content key holds a value of the wrong
    /// shape.
    pub fn from_changes(changes: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        let relevant: Map<String, Value> = changes
            .iter()
            .filter(|(key, _)| CONTENT_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        serde_json::from_value(Value::Object(relevant))
    }

    pub fn is_empty(&self) -> bool {
        *self == ContentPatch::default()
    }
}

// ── Full configuration ────────────────────────────────────────────────────────

/// The complete configuration: both slices together.
///
/// Both slices share one attribute map. Serialization writes the content
/// slice's copy, so a value with diverging copies does not survive a round
/// trip; [`Configuration::set_attributes`] keeps them equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredConfiguration", into = "StoredConfiguration")]
pub struct Configuration {
    pub backend: BackendConfiguration,
    pub content: ContentConfiguration,
}

impl Configuration {
    /// Sets the attributes shared by both slices.
    pub fn set_attributes(&mut self, attributes: OrderedMap) {
        self.backend.attributes = attributes.clone();
        self.content.attributes = attributes;
    }
}

/// Flat record mirroring the storage layout, one field per storage key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoredConfiguration {
    trace_collector_url: String,
    log_collector_url: String,
    match_patterns: Vec<String>,
    match_pattern_errors: Vec<MatchPatternError>,
    match_pattern_permission_errors: Vec<MatchPatternError>,
    headers: OrderedMap,
    attributes: OrderedMap,
    enabled: bool,
    tracing_enabled: bool,
    logging_enabled: bool,
    instrumentations: Vec<Instrumentation>,
    events: Vec<String>,
    propagate_to: Vec<String>,
    concurrency_limit: u32,
}

impl Default for StoredConfiguration {
    fn default() -> Self {
        Configuration::default().into()
    }
}

impl From<StoredConfiguration> for Configuration {
    fn from(s: StoredConfiguration) -> Self {
        Self {
            backend: BackendConfiguration {
                trace_collector_url: s.trace_collector_url,
                log_collector_url: s.log_collector_url,
                match_patterns: s.match_patterns,
                headers: s.headers,
                attributes: s.attributes.clone(),
                match_pattern_errors: s.match_pattern_errors,
                match_pattern_permission_errors: s.match_pattern_permission_errors,
            },
            content: ContentConfiguration {
                enabled: s.enabled,
                tracing_enabled: s.tracing_enabled,
                logging_enabled: s.logging_enabled,
                instrumentations: s.instrumentations,
                events: s.events,
                propagate_to: s.propagate_to,
                concurrency_limit: s.concurrency_limit,
                attributes: s.attributes,
            },
        }
    }
}

impl From<Configuration> for StoredConfiguration {
    fn from(c: Configuration) -> Self {
        Self {
            trace_collector_url: c.backend.trace_collector_url,
            log_collector_url: c.backend.log_collector_url,
            match_patterns: c.backend.match_patterns,
            match_pattern_errors: c.backend.match_pattern_errors,
            match_pattern_permission_errors: c.backend.match_pattern_permission_errors,
            headers: c.backend.headers,
            attributes: c.content.attributes,
            enabled: c.content.enabled,
            tracing_enabled: c.content.tracing_enabled,
            logging_enabled: c.content.logging_enabled,
            instrumentations: c.content.instrumentations,
            events: c.content.events,
            propagate_to: c.content.propagate_to,
            concurrency_limit: c.content.concurrency_limit,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_content_slice_is_active() {
        assert!(ContentConfiguration::default().is_active());
    }

    #[test]
    fn test_empty_instrumentation_set_is_inactive() {
        let cfg = ContentConfiguration {
            instrumentations: Vec::new(),
            ..ContentConfiguration::default()
        };
        assert!(!cfg.is_active());
    }

    #[test]
    fn test_disabled_is_inactive() {
        let cfg = ContentConfiguration {
            enabled: false,
            ..ContentConfiguration::default()
        };
        assert!(!cfg.is_active());
    }

    #[test]
    fn test_merge_applies_only_present_fields() {
        let mut cfg = ContentConfiguration::default();
        let patch = ContentPatch {
            enabled: Some(false),
            concurrency_limit: Some(5),
            ..ContentPatch::default()
        };

        cfg.merge(&patch);

        assert!(!cfg.enabled);
        assert_eq!(cfg.concurrency_limit, 5);
        assert_eq!(cfg.events, ContentConfiguration::default().events);
    }

    #[test]
    fn test_patch_from_changes_drops_backend_keys() {
        let mut changes = Map::new();
        changes.insert("traceCollectorUrl".into(), json!("http://collector"));
        changes.insert("headers".into(), json!("not even a map"));
        changes.insert("tracingEnabled".into(), json!(false));

        let patch = ContentPatch::from_changes(&changes).unwrap();

        assert_eq!(
            patch,
            ContentPatch {
                tracing_enabled: Some(false),
                ..ContentPatch::default()
            }
        );
    }

    #[test]
    fn test_patch_from_changes_revives_tagged_attributes() {
        let mut changes = Map::new();
        changes.insert(
            "attributes".into(),
            json!({"dataType": "Map", "value": [["service.name", "shop"]]}),
        );

        let patch = ContentPatch::from_changes(&changes).unwrap();

        assert_eq!(
            patch.attributes.unwrap().get("service.name"),
            Some("shop")
        );
    }

    #[test]
    fn test_patch_from_changes_rejects_malformed_content_value() {
        let mut changes = Map::new();
        changes.insert("enabled".into(), json!("yes"));
        assert!(ContentPatch::from_changes(&changes).is_err());
    }

    #[test]
    fn test_propagation_targets_skip_invalid_expressions() {
        let cfg = ContentConfiguration {
            propagate_to: vec![r"^https://api\.example\.com".into(), "(".into()],
            ..ContentConfiguration::default()
        };

        let targets = cfg.propagation_targets();

        assert_eq!(targets.len(), 1);
        assert!(targets[0].is_match("https://api.example.com/v1"));
    }

    #[test]
    fn test_attributes_are_stored_once_and_loaded_into_both_slices() {
        let mut cfg = Configuration::default();
        cfg.set_attributes([("env", "prod")].into_iter().collect());

        let value = serde_json::to_value(&cfg).unwrap();
        let reloaded: Configuration = serde_json::from_value(value.clone()).unwrap();

        assert_eq!(
            value["attributes"],
            json!({"dataType": "Map", "value": [["env", "prod"]]})
        );
        assert_eq!(reloaded.backend.attributes.get("env"), Some("prod"));
        assert_eq!(reloaded.content.attributes.get("env"), Some("prod"));
    }

    #[test]
    fn test_content_attributes_win_when_slices_diverge() {
        // Arrange
        let mut cfg = Configuration::default();
        cfg.backend.attributes = [("env", "stale")].into_iter().collect();
        cfg.content.attributes = [("env", "prod")].into_iter().collect();

        // Act
        let reloaded: Configuration =
            serde_json::from_value(serde_json::to_value(&cfg).unwrap()).unwrap();

        // Assert
        assert_eq!(reloaded.backend.attributes, cfg.content.attributes);
        assert_eq!(reloaded.content.attributes, cfg.content.attributes);
    }

    #[test]
    fn test_missing_keys_fall_back_to_defaults() {
        let cfg: Configuration = serde_json::from_value(json!({"enabled": false})).unwrap();
        assert!(!cfg.content.enabled);
        assert_eq!(
            cfg.backend.trace_collector_url,
            BackendConfiguration::default().trace_collector_url
        );
    }
}
