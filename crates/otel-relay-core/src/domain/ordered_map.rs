//! Insertion-ordered, key-unique string map used for headers and attributes.
//!
//! # Wire form
//!
//! The persisted key-value store only understands plain records, booleans,
//! numbers and strings. A plain record would lose the identity of the container
//! (it could not be told apart from any other object), so `OrderedMap`
//! serializes in a tagged form:
//!
//! ```json
//! {"dataType":"Map","value":[["authorization","Bearer x"],["x-team","web"]]}
//! ```
//!
//! Deserialization accepts both the tagged form and a plain object, which is how
//! the human-editable configuration text expands back into ordered maps.

use std::fmt;

use indexmap::IndexMap;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Tag value written into the `dataType` field of a serialized map.
pub const MAP_DATA_TYPE: &str = "Map";

/// An insertion-ordered map from string keys to string values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedMap(IndexMap<String, String>);

impl OrderedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `key`. A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Removes `key` while keeping the relative order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Entries appended from `other` override existing keys in place.
    pub fn merge(&mut self, other: &OrderedMap) {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OrderedMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl IntoIterator for OrderedMap {
    type Item = (String, String);
    type IntoIter = indexmap::map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// ── Serde ─────────────────────────────────────────────────────────────────────

impl Serialize for OrderedMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries: Vec<(&str, &str)> = self.iter().collect();
        let mut state = serializer.serialize_struct("OrderedMap", 2)?;
        state.serialize_field("dataType", MAP_DATA_TYPE)?;
        state.serialize_field("value", &entries)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for OrderedMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor)
    }
}

struct OrderedMapVisitor;

impl<'de> Visitor<'de> for OrderedMapVisitor {
    type Value = OrderedMap;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a tagged {dataType: \"Map\", value: [[k, v], ...]} or a plain object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<OrderedMap, A::Error> {
        // Plain objects and the tagged form are both JSON objects, so collect
        // every field first and decide afterwards.
        let mut fields: IndexMap<String, serde_json::Value> = IndexMap::new();
        while let Some((key, value)) = access.next_entry::<String, serde_json::Value>()? {
            fields.insert(key, value);
        }

        let is_tagged = fields.len() == 2
            && fields.get("dataType").and_then(|v| v.as_str()) == Some(MAP_DATA_TYPE)
            && fields.get("value").map_or(false, |v| v.is_array());

        if is_tagged {
            let value = fields.shift_remove("value").unwrap_or_default();
            let entries: Vec<(String, String)> =
                serde_json::from_value(value).map_err(de::Error::custom)?;
            return Ok(entries.into_iter().collect());
        }

        fields
            .into_iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(s) => Ok((key, s)),
                other => Err(de::Error::custom(format!(
                    "value for key {key:?} must be a string, found {other}"
                ))),
            })
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_keeps_first_position_on_replace() {
        let mut map = OrderedMap::new();
        map.insert("a", "1");
        map.insert("b", "2");
        map.insert("a", "3");

        let entries: Vec<_> = map.iter().collect();
        assert_eq!(entries, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_remove_preserves_order_of_remaining() {
        let mut map: OrderedMap = [("a", "1"), ("b", "2"), ("c", "3")].into_iter().collect();
        map.remove("a");
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn test_serializes_in_tagged_form() {
        let map: OrderedMap = [("z", "last"), ("a", "first")].into_iter().collect();

        let value = serde_json::to_value(&map).unwrap();

        assert_eq!(
            value,
            json!({"dataType": "Map", "value": [["z", "last"], ["a", "first"]]})
        );
    }

    #[test]
    fn test_deserializes_tagged_form_in_order() {
        let value = json!({"dataType": "Map", "value": [["z", "1"], ["a", "2"]]});

        let map: OrderedMap = serde_json::from_value(value).unwrap();

        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["z", "a"]);
        assert_eq!(map.get("a"), Some("2"));
    }

    #[test]
    fn test_deserializes_plain_object_in_order() {
        let map: OrderedMap = serde_json::from_str(r#"{"z":"1","a":"2"}"#).unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["z", "a"]);
    }

    #[test]
    fn test_plain_object_with_data_type_key_is_not_mistaken_for_tag() {
        let map: OrderedMap = serde_json::from_str(r#"{"dataType":"Map"}"#).unwrap();
        assert_eq!(map.get("dataType"), Some("Map"));
    }

    #[test]
    fn test_non_string_values_are_rejected() {
        assert!(serde_json::from_str::<OrderedMap>(r#"{"a":1}"#).is_err());
    }

    #[test]
    fn test_merge_overrides_in_place_and_appends_new() {
        let mut base: OrderedMap = [("a", "1"), ("b", "2")].into_iter().collect();
        let other: OrderedMap = [("b", "20"), ("c", "30")].into_iter().collect();

        base.merge(&other);

        let entries: Vec<_> = base.iter().collect();
        assert_eq!(entries, vec![("a", "1"), ("b", "20"), ("c", "30")]);
    }
}
