//! Serialization adapter: [`StoreState`] to snapshot entries and back.
//!
//! The byte format is pluggable through [`Codec`]; the adapter only ever hands
//! it a `serde_json::Value` (scalars, sequences, string-keyed records). Map
//! containers reach the codec already in their tagged form (see
//! [`OrderedMap`]).
//!
//! A snapshot is split into entries:
//! - `rest.state`: one record keyed by sub-state name (`components`, `pages`, `status`)
//! - `nodes.<n>.state`: the `nodes` map, chunked so no entry grows past the
//!   configured bound
//!
//! `nodesByType` is not written. Decoding rebuilds it from `nodes`, so the
//! restored index can differ in shape from the one that was in memory.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CodecError, PersistError};
use crate::ordered_map::OrderedMap;
use crate::state::{sub_state, Node, StoreState};

/// Entry holding every persisted sub-state except `nodes`.
pub const REST_ENTRY: &str = "rest.state";

/// How many nodes are sampled when guessing the chunk size.
const CHUNK_SAMPLES: usize = 10;

/// Converts wire values to bytes and back.
pub trait Codec: Send + Sync {
    /// Recorded in the snapshot manifest; a snapshot is only decoded by the
    /// codec that wrote it.
    fn name(&self) -> &str;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// Compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Serialize(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Deserialize(e.to_string()))
    }
}

/// One named, encoded piece of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SnapshotEntry {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Entry name of the `index`-th node chunk.
pub fn node_chunk_entry(index: usize) -> String {
    format!("nodes.{index}.state")
}

/// Index of a node chunk entry name.
pub fn parse_node_chunk_entry(name: &str) -> Option<usize> {
    name.strip_prefix("nodes.")?
        .strip_suffix(".state")?
        .parse()
        .ok()
}

fn to_wire<T: Serialize>(name: &str, value: &T) -> Result<Value, PersistError> {
    serde_json::to_value(value).map_err(|e| PersistError::Encode {
        sub_state: name.to_string(),
        source: CodecError::Serialize(e.to_string()),
    })
}

fn encode_wire(name: &str, codec: &dyn Codec, value: &Value) -> Result<Vec<u8>, PersistError> {
    codec.encode(value).map_err(|source| PersistError::Encode {
        sub_state: name.to_string(),
        source,
    })
}

/// Encode the persisted sub-states of `state` into snapshot entries.
pub fn encode_state(
    state: &StoreState,
    codec: &dyn Codec,
    max_chunk_bytes: u64,
) -> Result<Vec<SnapshotEntry>, PersistError> {
    let mut rest = Map::new();
    rest.insert(
        sub_state::COMPONENTS.to_string(),
        to_wire(sub_state::COMPONENTS, &state.components)?,
    );
    rest.insert(
        sub_state::PAGES.to_string(),
        to_wire(sub_state::PAGES, &state.pages)?,
    );
    rest.insert(
        sub_state::STATUS.to_string(),
        to_wire(sub_state::STATUS, &state.status)?,
    );

    let mut entries = vec![SnapshotEntry::new(
        REST_ENTRY,
        encode_wire(REST_ENTRY, codec, &Value::Object(rest))?,
    )];

    let nodes: Vec<(&String, &Node)> = state.nodes.iter().collect();
    if nodes.is_empty() {
        return Ok(entries);
    }

    let chunk_size = guess_chunk_size(&nodes, codec, max_chunk_bytes)?;
    for (index, chunk) in nodes.chunks(chunk_size).enumerate() {
        let chunk: OrderedMap<&Node> =
            chunk.iter().map(|(id, node)| ((*id).clone(), *node)).collect();
        let value = to_wire(sub_state::NODES, &chunk)?;
        entries.push(SnapshotEntry::new(
            node_chunk_entry(index),
            encode_wire(sub_state::NODES, codec, &value)?,
        ));
    }

    tracing::debug!(
        nodes = nodes.len(),
        chunk_size,
        chunks = entries.len() - 1,
        "encoded node chunks"
    );
    Ok(entries)
}

/// Guess how many nodes fit in one chunk of at most `max_chunk_bytes`.
///
/// Encodes up to 11 evenly spaced nodes (always including the last one) and
/// sizes chunks by the largest.
pub fn guess_chunk_size(
    nodes: &[(&String, &Node)],
    codec: &dyn Codec,
    max_chunk_bytes: u64,
) -> Result<usize, PersistError> {
    let count = nodes.len();
    if count == 0 {
        return Ok(1);
    }

    let step = count.div_ceil(CHUNK_SAMPLES).max(1);
    let mut indexes: Vec<usize> = (0..count).step_by(step).collect();
    if indexes.last() != Some(&(count - 1)) {
        indexes.push(count - 1);
    }

    let mut max_size = 0u64;
    for index in indexes {
        let value = to_wire(sub_state::NODES, &nodes[index])?;
        let size = encode_wire(sub_state::NODES, codec, &value)?.len() as u64;
        max_size = max_size.max(size);
    }

    Ok(((max_chunk_bytes / max_size.max(1)) as usize).max(1))
}

fn take_sub_state<T>(
    merged: &mut Map<String, Value>,
    name: &str,
    dir: &Path,
) -> Result<T, PersistError>
where
    T: DeserializeOwned + Default,
{
    match merged.remove(name) {
        Some(value) => serde_json::from_value(value).map_err(|e| {
            PersistError::corrupt(dir, format!("sub-state {name} does not decode: {e}"))
        }),
        None => Ok(T::default()),
    }
}

/// Decode snapshot entries back into a [`StoreState`].
///
/// Entries are merged as a flat union by sub-state name. Sub-states absent
/// from the snapshot come back empty; unknown ones are ignored.
pub fn decode_state(
    dir: &Path,
    entries: &[SnapshotEntry],
    codec: &dyn Codec,
) -> Result<StoreState, PersistError> {
    let mut merged = Map::new();
    let mut nodes = OrderedMap::<Node>::new();

    for entry in entries {
        let path = dir.join(&entry.name);
        let value = codec
            .decode(&entry.bytes)
            .map_err(|e| PersistError::corrupt(&path, e.to_string()))?;

        if entry.name == REST_ENTRY {
            let Value::Object(record) = value else {
                return Err(PersistError::corrupt(&path, "rest entry is not a record"));
            };
            for (name, sub) in record {
                if merged.contains_key(&name) {
                    return Err(PersistError::corrupt(
                        &path,
                        format!("sub-state {name} appears twice"),
                    ));
                }
                merged.insert(name, sub);
            }
        } else if parse_node_chunk_entry(&entry.name).is_some() {
            let chunk: OrderedMap<Node> = serde_json::from_value(value).map_err(|e| {
                PersistError::corrupt(&path, format!("node chunk does not decode: {e}"))
            })?;
            for (id, node) in chunk {
                if node.id != id {
                    return Err(PersistError::corrupt(
                        &path,
                        format!("node key {id} does not match node id {}", node.id),
                    ));
                }
                if nodes.contains_key(&id) {
                    return Err(PersistError::corrupt(
                        &path,
                        format!("node {id} appears in more than one chunk"),
                    ));
                }
                nodes.insert(id, node);
            }
        } else {
            tracing::debug!(entry = %entry.name, "ignoring unknown snapshot entry");
        }
    }

    let mut state = StoreState {
        components: take_sub_state(&mut merged, sub_state::COMPONENTS, dir)?,
        pages: take_sub_state(&mut merged, sub_state::PAGES, dir)?,
        status: take_sub_state(&mut merged, sub_state::STATUS, dir)?,
        nodes,
        nodes_by_type: OrderedMap::new(),
    };
    if merged.remove(sub_state::NODES_BY_TYPE).is_some() {
        tracing::debug!("ignoring stored nodesByType, rebuilding it from nodes");
    }
    state.rebuild_nodes_by_type();

    for name in merged.keys() {
        tracing::debug!(sub_state = %name, "ignoring unknown sub-state");
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Action, Page, Store};
    use serde_json::json;

    fn populated_store(node_count: usize) -> Store {
        let mut store = Store::new();
        store.dispatch(Action::CreatePage {
            page: Page::new("/p/", "/t.js").with_context(json!({"id": "123456"})),
            plugin: "default-site-plugin".to_string(),
        });
        for i in 0..node_count {
            let node_type = if i % 2 == 0 { "File" } else { "Markdown" };
            store.dispatch(Action::CreateNode(
                Node::new(format!("node-{i:03}"), node_type, "fs").with_data(json!({"index": i})),
            ));
        }
        store.dispatch(Action::SetPluginStatus {
            plugin: "fs".to_string(),
            status: json!({"lastFetched": 42}),
        });
        store
    }

    #[test]
    fn test_rest_entry_uses_tagged_maps() {
        let store = populated_store(0);
        let entries = encode_state(store.state(), &JsonCodec, u64::MAX).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, REST_ENTRY);

        let value: Value = serde_json::from_slice(&entries[0].bytes).unwrap();
        assert_eq!(value["components"]["kind"], "orderedMap");
        assert_eq!(value["pages"]["entries"][0][0], "/p/");
        assert!(value.get(sub_state::NODES_BY_TYPE).is_none());
    }

    #[test]
    fn test_round_trip_restores_every_sub_state() {
        let mut store = populated_store(25);
        store.dispatch(Action::CreatePage {
            page: Page::new("/app/", "/app.js").with_match_path("/app/*"),
            plugin: "default-site-plugin".to_string(),
        });
        let entries = encode_state(store.state(), &JsonCodec, u64::MAX).unwrap();
        let restored = decode_state(Path::new("/snap"), &entries, &JsonCodec).unwrap();

        assert_eq!(restored.components, store.state().components);
        assert_eq!(restored.pages, store.state().pages);
        assert_eq!(
            restored.pages.get("/app/").and_then(|p| p.match_path.as_deref()),
            Some("/app/*")
        );
        assert_eq!(restored.status, store.state().status);
        assert_eq!(restored.nodes, store.state().nodes);
        assert_eq!(restored.nodes_by_type.get("File").map(|ids| ids.len()), Some(13));
    }

    #[test]
    fn test_small_bound_splits_nodes_into_chunks() {
        let store = populated_store(30);
        let entries = encode_state(store.state(), &JsonCodec, 512).unwrap();

        let chunks: Vec<usize> = entries
            .iter()
            .filter_map(|e| parse_node_chunk_entry(&e.name))
            .collect();
        assert!(chunks.len() > 1, "expected several chunks, got {}", chunks.len());
        assert_eq!(chunks, (0..chunks.len()).collect::<Vec<_>>());

        let restored = decode_state(Path::new("/snap"), &entries, &JsonCodec).unwrap();
        assert_eq!(restored.nodes.len(), 30);
    }

    #[test]
    fn test_guess_chunk_size_never_zero() {
        let store = populated_store(3);
        let nodes: Vec<(&String, &Node)> = store.state().nodes.iter().collect();
        assert_eq!(guess_chunk_size(&nodes, &JsonCodec, 1).unwrap(), 1);
        assert!(guess_chunk_size(&nodes, &JsonCodec, u64::MAX).unwrap() > 3);
    }

    #[test]
    fn test_missing_sub_states_default_to_empty() {
        let entries = vec![SnapshotEntry::new(REST_ENTRY, b"{\"future\": 1}".to_vec())];
        let restored = decode_state(Path::new("/snap"), &entries, &JsonCodec).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_duplicate_node_across_chunks_is_corrupt() {
        let store = populated_store(1);
        let entries = encode_state(store.state(), &JsonCodec, u64::MAX).unwrap();
        let chunk = entries[1].bytes.clone();
        let doubled = vec![
            entries[0].clone(),
            SnapshotEntry::new(node_chunk_entry(0), chunk.clone()),
            SnapshotEntry::new(node_chunk_entry(1), chunk),
        ];

        let err = decode_state(Path::new("/snap"), &doubled, &JsonCodec).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_node_key_must_match_node_id() {
        let chunk = json!({
            "kind": "orderedMap",
            "entries": [["a", {"id": "b", "type": "File", "owner": "fs"}]],
        });
        let entries = vec![SnapshotEntry::new(
            node_chunk_entry(0),
            serde_json::to_vec(&chunk).unwrap(),
        )];

        let err = decode_state(Path::new("/snap"), &entries, &JsonCodec).unwrap_err();
        assert!(err.is_corrupt());
        assert!(err.to_string().contains("node key a does not match node id b"));
    }

    #[test]
    fn test_stored_nodes_by_type_is_rebuilt() {
        let store = populated_store(2);
        let mut entries = encode_state(store.state(), &JsonCodec, u64::MAX).unwrap();
        let mut rest: Value = serde_json::from_slice(&entries[0].bytes).unwrap();
        rest[sub_state::NODES_BY_TYPE] = json!({
            "kind": "orderedMap",
            "entries": [["Stale", {"kind": "orderedMap", "entries": []}]],
        });
        entries[0] = SnapshotEntry::new(REST_ENTRY, serde_json::to_vec(&rest).unwrap());

        let restored = decode_state(Path::new("/snap"), &entries, &JsonCodec).unwrap();
        assert_eq!(restored.nodes_by_type, store.state().nodes_by_type);
        assert!(restored.nodes_by_type.get("Stale").is_none());
    }

    #[test]
    fn test_foreign_bytes_are_corrupt() {
        let entries = vec![SnapshotEntry::new(REST_ENTRY, b"\x00\x01not json".to_vec())];
        let err = decode_state(Path::new("/snap"), &entries, &JsonCodec).unwrap_err();
        assert!(err.is_corrupt());

        let entries = vec![SnapshotEntry::new(REST_ENTRY, b"[1, 2]".to_vec())];
        let err = decode_state(Path::new("/snap"), &entries, &JsonCodec).unwrap_err();
        assert!(err.to_string().contains("not a record"));
    }

    #[test]
    fn test_parse_node_chunk_entry() {
        assert_eq!(parse_node_chunk_entry("nodes.0.state"), Some(0));
        assert_eq!(parse_node_chunk_entry(&node_chunk_entry(12)), Some(12));
        assert_eq!(parse_node_chunk_entry("rest.state"), None);
        assert_eq!(parse_node_chunk_entry("nodes.x.state"), None);
    }
}
