//! The in-memory state store that snapshots are taken from and restored into.
//!
//! State only changes through [`Store::dispatch`]. The store is an explicitly
//! owned handle: whoever runs the process builds one (empty, or rehydrated from
//! a restored snapshot) and passes it by reference to save/restore.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ordered_map::OrderedMap;

/// Wire names of the sub-states.
pub mod sub_state {
    pub const COMPONENTS: &str = "components";
    pub const PAGES: &str = "pages";
    pub const NODES: &str = "nodes";
    pub const NODES_BY_TYPE: &str = "nodesByType";
    pub const STATUS: &str = "status";
}

/// A page created by a plugin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// URL path, e.g. `/blog/hello/`
    pub path: String,

    /// Path of the component that renders this page
    pub component: String,

    /// Passed to the component as props and to its query as variables
    #[serde(default = "empty_object")]
    pub context: Value,

    /// Client-side route pattern, if any
    #[serde(default)]
    pub match_path: Option<String>,

    /// Plugin that created the page
    #[serde(default)]
    pub plugin_creator: String,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Page {
    pub fn new(path: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            component: component.into(),
            context: empty_object(),
            match_path: None,
            plugin_creator: String::new(),
        }
    }

    /// Builder: set context
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Builder: set match path
    pub fn with_match_path(mut self, match_path: impl Into<String>) -> Self {
        self.match_path = Some(match_path.into());
        self
    }
}

/// Metadata for one page component, keyed by component path in the
/// components index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRecord {
    pub component_path: String,

    /// Paths of the pages rendered by this component
    pub pages: BTreeSet<String>,

    /// Extracted page query, empty until query extraction runs
    #[serde(default)]
    pub query: String,

    #[serde(default)]
    pub is_in_bootstrap: bool,
}

impl ComponentRecord {
    pub fn new(component_path: impl Into<String>) -> Self {
        Self {
            component_path: component_path.into(),
            pages: BTreeSet::new(),
            query: String::new(),
            is_in_bootstrap: true,
        }
    }
}

/// A content node sourced by a plugin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,

    #[serde(rename = "type")]
    pub node_type: String,

    /// Plugin that owns the node
    pub owner: String,

    #[serde(default)]
    pub content_digest: String,

    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub children: Vec<String>,

    /// Type-specific fields
    #[serde(default)]
    pub data: Value,
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        node_type: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            owner: owner.into(),
            content_digest: String::new(),
            parent: None,
            children: Vec::new(),
            data: Value::Null,
        }
    }

    /// Builder: set parent
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Builder: set data and its digest
    pub fn with_data(mut self, data: Value) -> Self {
        self.content_digest =
            crate::digest::EntryDigest::of(data.to_string().as_bytes()).to_string();
        self.data = data;
        self
    }
}

/// The full state held by a [`Store`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreState {
    /// Component path -> component metadata
    pub components: OrderedMap<ComponentRecord>,

    /// Page path -> page
    pub pages: OrderedMap<Page>,

    /// Node id -> node
    pub nodes: OrderedMap<Node>,

    /// Node type -> ids of nodes of that type. Derived from `nodes`; never persisted.
    pub nodes_by_type: OrderedMap<BTreeSet<String>>,

    /// Plugin name -> plugin-defined status
    pub status: OrderedMap<Value>,
}

impl StoreState {
    /// True when every sub-state is empty, i.e. the state right after start
    /// or after `DeleteCache`.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
            && self.pages.is_empty()
            && self.nodes.is_empty()
            && self.nodes_by_type.is_empty()
            && self.status.is_empty()
    }

    /// Recompute `nodes_by_type` from `nodes`.
    pub fn rebuild_nodes_by_type(&mut self) {
        self.nodes_by_type.clear();
        for (id, node) in &self.nodes {
            self.nodes_by_type
                .get_or_insert_with(&node.node_type, BTreeSet::new)
                .insert(id.clone());
        }
    }

    fn unindex_node(&mut self, node_type: &str, id: &str) {
        if let Some(ids) = self.nodes_by_type.get_mut(node_type) {
            ids.remove(id);
            if ids.is_empty() {
                self.nodes_by_type.remove(node_type);
            }
        }
    }
}

/// Mutations accepted by [`Store::dispatch`].
#[derive(Clone, Debug)]
pub enum Action {
    CreatePage { page: Page, plugin: String },
    DeletePage { path: String },
    CreateNode(Node),
    DeleteNode { id: String },
    SetPluginStatus { plugin: String, status: Value },
    /// Reset every sub-state to its initial empty shape. Memory only.
    DeleteCache,
}

/// Single-owner handle on the state.
#[derive(Debug, Default)]
pub struct Store {
    state: StoreState,
}

impl Store {
    /// A store in its initial empty shape.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrate a store from restored state.
    pub fn with_state(state: StoreState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    pub fn dispatch(&mut self, action: Action) {
        let state = &mut self.state;
        match action {
            Action::CreatePage { mut page, plugin } => {
                page.plugin_creator = plugin;
                if let Some(previous) = state.pages.get(&page.path) {
                    if previous.component != page.component {
                        let old_component = previous.component.clone();
                        if let Some(record) = state.components.get_mut(&old_component) {
                            record.pages.remove(&page.path);
                        }
                    }
                }
                state
                    .components
                    .get_or_insert_with(&page.component, || {
                        ComponentRecord::new(page.component.clone())
                    })
                    .pages
                    .insert(page.path.clone());
                state.pages.insert(page.path.clone(), page);
            }
            Action::DeletePage { path } => {
                if let Some(page) = state.pages.remove(&path) {
                    if let Some(record) = state.components.get_mut(&page.component) {
                        record.pages.remove(&path);
                    }
                }
            }
            Action::CreateNode(node) => {
                if let Some(previous) = state.nodes.get(&node.id) {
                    let old_type = previous.node_type.clone();
                    state.unindex_node(&old_type, &node.id);
                }
                state
                    .nodes_by_type
                    .get_or_insert_with(&node.node_type, BTreeSet::new)
                    .insert(node.id.clone());
                state.nodes.insert(node.id.clone(), node);
            }
            Action::DeleteNode { id } => {
                if let Some(node) = state.nodes.remove(&id) {
                    state.unindex_node(&node.node_type, &id);
                }
            }
            Action::SetPluginStatus { plugin, status } => {
                state.status.insert(plugin, status);
            }
            Action::DeleteCache => {
                *state = StoreState::default();
            }
        }
    }
}
