//! Ordered key-unique mappings and their tagged wire form.
//!
//! The wire data model only has scalars, sequences and string-keyed records.
//! A record would lose the "this is a map container" meaning, so maps are
//! written as a tagged entry list instead:
//!
//! ```json
//! {"kind": "orderedMap", "entries": [["/p/", {...}], ["/q/", {...}]]}
//! ```
//!
//! Entries are written in key order so identical state encodes to identical bytes.

use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Tag value identifying an encoded [`OrderedMap`].
pub const ORDERED_MAP_KIND: &str = "orderedMap";

/// A key-unique mapping from string keys to values, iterated in key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedMap<V>(BTreeMap<String, V>);

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.0.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert or replace, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.0.remove(key)
    }

    /// Get the value for `key`, inserting `default()` first if absent.
    pub fn get_or_insert_with(&mut self, key: &str, default: impl FnOnce() -> V) -> &mut V {
        self.0.entry(key.to_string()).or_insert_with(default)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, V> {
        self.0.iter()
    }

    pub fn keys(&self) -> btree_map::Keys<'_, String, V> {
        self.0.keys()
    }
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<V> IntoIterator for OrderedMap<V> {
    type Item = (String, V);
    type IntoIter = btree_map::IntoIter<String, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, V> IntoIterator for &'a OrderedMap<V> {
    type Item = (&'a String, &'a V);
    type IntoIter = btree_map::Iter<'a, String, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct TaggedRef<'a, V> {
            kind: &'static str,
            entries: Vec<(&'a str, &'a V)>,
        }

        TaggedRef {
            kind: ORDERED_MAP_KIND,
            entries: self.0.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        }
        .serialize(serializer)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Tagged<V> {
            kind: String,
            entries: Vec<(String, V)>,
        }

        let tagged = Tagged::<V>::deserialize(deserializer)?;
        if tagged.kind != ORDERED_MAP_KIND {
            return Err(D::Error::custom(format!(
                "expected container kind {:?}, found {:?}",
                ORDERED_MAP_KIND, tagged.kind
            )));
        }

        let mut map = BTreeMap::new();
        for (key, value) in tagged.entries {
            if map.contains_key(&key) {
                return Err(D::Error::custom(format!("duplicate map key {key:?}")));
            }
            map.insert(key, value);
        }
        Ok(Self(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encodes_as_tagged_entry_list() {
        let mut map = OrderedMap::new();
        map.insert("/b/", 2);
        map.insert("/a/", 1);

        let value = serde_json::to_value(&map).unwrap();
        assert_eq!(
            value,
            json!({"kind": "orderedMap", "entries": [["/a/", 1], ["/b/", 2]]})
        );
    }

    #[test]
    fn test_decodes_tagged_form() {
        let value = json!({"kind": "orderedMap", "entries": [["x", "one"], ["y", "two"]]});
        let map: OrderedMap<String> = serde_json::from_value(value).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("y").map(String::as_str), Some("two"));
    }

    #[test]
    fn test_nested_maps_survive() {
        let mut inner = OrderedMap::new();
        inner.insert("id-1", true);
        let mut outer = OrderedMap::new();
        outer.insert("Page", inner);

        let json = serde_json::to_string(&outer).unwrap();
        let restored: OrderedMap<OrderedMap<bool>> = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, outer);
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let value = json!({"kind": "orderedMap", "entries": [["k", 1], ["k", 2]]});
        let err = serde_json::from_value::<OrderedMap<i32>>(value).unwrap_err();
        assert!(err.to_string().contains("duplicate map key"));
    }

    #[test]
    fn test_rejects_plain_record() {
        let value = json!({"k": 1});
        assert!(serde_json::from_value::<OrderedMap<i32>>(value).is_err());

        let value = json!({"kind": "set", "entries": []});
        let err = serde_json::from_value::<OrderedMap<i32>>(value).unwrap_err();
        assert!(err.to_string().contains("expected container kind"));
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut map: OrderedMap<Vec<u8>> = OrderedMap::new();
        map.get_or_insert_with("k", Vec::new).push(1);
        map.get_or_insert_with("k", Vec::new).push(2);
        assert_eq!(map.get("k"), Some(&vec![1, 2]));
    }
}
