//! # Core Type Definitions
//!
//! This module contains the data model of the recon graph:
//! - Stored elements (`Node`, `Edge`)
//! - Incoming element specifications (`NodeSpec`, `EdgeSpec`)
//! - Element references and the working set (`ElementRef`, `Selection`)
//! - Error types (`ReconError`)
//!
//! ## Attribute Maps
//!
//! Open-ended attributes (`props` and any extra top-level keys) are kept as
//! `serde_json` maps. Merges are always shallow: incoming keys overwrite,
//! absent keys are preserved.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;

/// Open attribute map used for `props` and extra element data.
pub type Attributes = Map<String, Value>;

// =============================================================================
// WELL-KNOWN NODE TYPES
// =============================================================================

/// Node type names shared by the engine and the enrichment jobs.
pub mod kind {
    pub const GROUP: &str = "group";
    pub const DOMAIN: &str = "domain";
    pub const URI: &str = "uri";
    pub const EMAIL: &str = "email";
    pub const IPV4: &str = "ipv4";
    pub const IPV6: &str = "ipv6";
    pub const PORT: &str = "port";
    pub const ORG: &str = "org";
    pub const BRAND: &str = "brand";
    pub const NICK: &str = "nick";
}

// =============================================================================
// NODE
// =============================================================================

/// A node stored in the graph.
///
/// `weight` is derived (see `Graph::measure`) and never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub props: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub weight: u64,
    /// Extra top-level attributes.
    #[serde(flatten)]
    pub data: Attributes,
}

impl Node {
    /// Create a bare node.
    #[must_use]
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            label: label.into(),
            props: Attributes::new(),
            parent: None,
            weight: 0,
            data: Attributes::new(),
        }
    }

    /// Resolve a dotted attribute path (`label`, `props.domain`, `extra.a.b`).
    ///
    /// The first segment names a top-level field or an extra attribute;
    /// remaining segments descend into objects and arrays.
    #[must_use]
    pub fn attribute(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let head = segments.next()?;
        let root = match head {
            "id" => Value::String(self.id.clone()),
            "type" => Value::String(self.node_type.clone()),
            "label" => Value::String(self.label.clone()),
            "props" => Value::Object(self.props.clone()),
            "parent" => self.parent.clone().map_or(Value::Null, Value::String),
            "weight" => Value::from(self.weight),
            other => self.data.get(other)?.clone(),
        };
        descend(root, segments)
    }
}

// =============================================================================
// EDGE
// =============================================================================

/// A directed edge stored in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type", default)]
    pub edge_type: String,
    #[serde(flatten)]
    pub data: Attributes,
}

impl Edge {
    /// Resolve a dotted attribute path, as for `Node::attribute`.
    #[must_use]
    pub fn attribute(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let head = segments.next()?;
        let root = match head {
            "id" => Value::String(self.id.clone()),
            "source" => Value::String(self.source.clone()),
            "target" => Value::String(self.target.clone()),
            "type" => Value::String(self.edge_type.clone()),
            other => self.data.get(other)?.clone(),
        };
        descend(root, segments)
    }

    /// Check whether the edge starts and ends at the same node.
    #[must_use]
    pub fn is_loop(&self) -> bool {
        self.source == self.target
    }
}

fn descend<'a>(mut value: Value, segments: impl Iterator<Item = &'a str>) -> Option<Value> {
    for segment in segments {
        value = match value {
            Value::Object(mut map) => map.remove(segment)?,
            Value::Array(mut items) => {
                let index: usize = segment.parse().ok()?;
                if index >= items.len() {
                    return None;
                }
                items.swap_remove(index)
            }
            _ => return None,
        };
    }
    Some(value)
}

// =============================================================================
// ELEMENT SPECIFICATIONS
// =============================================================================

/// An incoming node specification, as produced by callers and transforms.
///
/// Missing `id` is derived from `(type, label)` on upsert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<EdgeSpec>,
    /// Extra top-level attributes merged shallowly into the node.
    #[serde(flatten)]
    pub data: Attributes,
}

impl NodeSpec {
    /// Spec for a node of the given type and label.
    #[must_use]
    pub fn new(node_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            node_type: Some(node_type.into()),
            label: Some(label.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props
            .get_or_insert_with(Attributes::new)
            .insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn with_edge(mut self, edge: impl Into<EdgeSpec>) -> Self {
        self.edges.push(edge.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// An edge declared on a `NodeSpec`. The declaring node is always the target.
///
/// Accepts either a bare source id or an object with `source`, `type` and
/// extra attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EdgeSpec {
    Source(String),
    Detailed {
        #[serde(default)]
        source: String,
        #[serde(rename = "type", default)]
        edge_type: String,
        #[serde(flatten)]
        data: Attributes,
    },
}

impl EdgeSpec {
    /// Edge of the given type from `source`.
    #[must_use]
    pub fn typed(source: impl Into<String>, edge_type: impl Into<String>) -> Self {
        Self::Detailed {
            source: source.into(),
            edge_type: edge_type.into(),
            data: Attributes::new(),
        }
    }

    #[must_use]
    pub fn source(&self) -> &str {
        match self {
            Self::Source(source) | Self::Detailed { source, .. } => source,
        }
    }

    #[must_use]
    pub fn edge_type(&self) -> &str {
        match self {
            Self::Source(_) => "",
            Self::Detailed { edge_type, .. } => edge_type,
        }
    }

    #[must_use]
    pub fn data(&self) -> Option<&Attributes> {
        match self {
            Self::Source(_) => None,
            Self::Detailed { data, .. } => Some(data),
        }
    }
}

impl From<&str> for EdgeSpec {
    fn from(source: &str) -> Self {
        Self::Source(source.to_string())
    }
}

impl From<String> for EdgeSpec {
    fn from(source: String) -> Self {
        Self::Source(source)
    }
}

// =============================================================================
// ELEMENT REFERENCES & SELECTION (Working Set)
// =============================================================================

/// Reference to a stored element.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "group", content = "id", rename_all = "lowercase")]
pub enum ElementRef {
    Node(String),
    Edge(String),
}

impl ElementRef {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Node(id) | Self::Edge(id) => id,
        }
    }

    #[must_use]
    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node(_))
    }
}

/// The working set: an ordered, duplicate-free collection of element
/// references.
///
/// - Session-scoped and volatile
/// - Replaced wholesale by selection, traversal and transform calls
/// - Never serialized with the graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    elements: Vec<ElementRef>,
    index: BTreeSet<ElementRef>,
}

impl Selection {
    /// Create an empty selection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element unless already present. Returns `true` if added.
    pub fn push(&mut self, element: ElementRef) -> bool {
        if self.index.contains(&element) {
            return false;
        }
        self.index.insert(element.clone());
        self.elements.push(element);
        true
    }

    /// Append every element of another selection, preserving order.
    pub fn extend_from(&mut self, other: &Selection) {
        for element in other.iter() {
            self.push(element.clone());
        }
    }

    /// Keep only the elements for which the predicate holds.
    pub fn retain(&mut self, mut keep: impl FnMut(&ElementRef) -> bool) {
        let index = &mut self.index;
        self.elements.retain(|element| {
            let kept = keep(element);
            if !kept {
                index.remove(element);
            }
            kept
        });
    }

    /// Remove all elements.
    pub fn clear(&mut self) {
        self.elements.clear();
        self.index.clear();
    }

    #[must_use]
    pub fn contains(&self, element: &ElementRef) -> bool {
        self.index.contains(element)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementRef> {
        self.elements.iter()
    }

    /// Ids of the selected nodes, in selection order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(|element| match element {
            ElementRef::Node(id) => Some(id.as_str()),
            ElementRef::Edge(_) => None,
        })
    }

    /// Ids of the selected edges, in selection order.
    pub fn edge_ids(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(|element| match element {
            ElementRef::Edge(id) => Some(id.as_str()),
            ElementRef::Node(_) => None,
        })
    }

    /// A copy holding only the node references.
    #[must_use]
    pub fn nodes_only(&self) -> Self {
        self.node_ids()
            .map(|id| ElementRef::Node(id.to_string()))
            .collect()
    }
}

impl FromIterator<ElementRef> for Selection {
    fn from_iter<I: IntoIterator<Item = ElementRef>>(iter: I) -> Self {
        let mut selection = Self::new();
        for element in iter {
            selection.push(element);
        }
        selection
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the recon engine.
///
/// Request-level failures only: per-element problems during a batch upsert
/// are reported as events and never abort the call.
#[derive(Debug, Error)]
pub enum ReconError {
    /// A node or edge specification cannot be applied.
    #[error("Invalid element spec: {0}")]
    InvalidSpec(String),

    /// A selector expression failed to parse.
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// A traversal step names a function that is not registered.
    #[error("Unrecognized traverse function {0}")]
    UnknownTraversal(String),

    /// An explicit transform name is not registered.
    #[error("Unknown transform {0}")]
    UnknownTransform(String),

    /// A filter pattern failed to compile.
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The requested node was not found in the graph.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The requested edge was not found in the graph.
    #[error("Edge not found: {0}")]
    EdgeNotFound(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn selection_deduplicates_and_keeps_order() {
        let mut selection = Selection::new();
        assert!(selection.push(ElementRef::Node("b".into())));
        assert!(selection.push(ElementRef::Node("a".into())));
        assert!(!selection.push(ElementRef::Node("b".into())));
        assert!(selection.push(ElementRef::Edge("b".into())));

        let ids: Vec<_> = selection.node_ids().collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(selection.len(), 3);
    }

    #[test]
    fn selection_retain_updates_index() {
        let mut selection: Selection = ["a", "b", "c"]
            .into_iter()
            .map(|id| ElementRef::Node(id.to_string()))
            .collect();

        selection.retain(|element| element.id() != "b");

        assert!(!selection.contains(&ElementRef::Node("b".into())));
        assert!(selection.push(ElementRef::Node("b".into())));
        assert_eq!(selection.node_ids().collect::<Vec<_>>(), vec!["a", "c", "b"]);
    }

    #[test]
    fn node_attribute_paths() {
        let mut node = Node::new("n1", "domain", "example.com");
        node.props.insert("dns".into(), json!({"a": ["1.2.3.4"]}));
        node.data.insert("source".into(), json!("manual"));

        assert_eq!(node.attribute("type"), Some(json!("domain")));
        assert_eq!(node.attribute("props.dns.a.0"), Some(json!("1.2.3.4")));
        assert_eq!(node.attribute("source"), Some(json!("manual")));
        assert_eq!(node.attribute("props.missing"), None);
        assert_eq!(node.attribute("parent"), Some(Value::Null));
    }

    #[test]
    fn edge_spec_accepts_string_or_object() {
        let spec: NodeSpec = serde_json::from_value(json!({
            "type": "ipv4",
            "label": "10.0.0.1",
            "edges": ["a", {"source": "b", "type": "resolves", "ttl": 60}],
            "confidence": "high"
        }))
        .expect("parse");

        assert_eq!(spec.edges.len(), 2);
        assert_eq!(spec.edges[0].source(), "a");
        assert_eq!(spec.edges[0].edge_type(), "");
        assert_eq!(spec.edges[1].source(), "b");
        assert_eq!(spec.edges[1].edge_type(), "resolves");
        assert_eq!(spec.edges[1].data().and_then(|d| d.get("ttl")), Some(&json!(60)));
        assert_eq!(spec.data.get("confidence"), Some(&json!("high")));
    }

    #[test]
    fn node_serializes_type_field() {
        let node = Node::new("n1", "org", "ACME");
        let value = serde_json::to_value(&node).expect("serialize");
        assert_eq!(value["type"], json!("org"));
        assert!(value.get("parent").is_none());
    }
}
