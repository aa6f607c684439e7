//! # Graph Store
//!
//! The in-memory element collection of a recon session.
//!
//! Nodes and edges are keyed by string id in `BTreeMap`s, so every
//! iteration and every query result has a deterministic order. Three
//! secondary indices are maintained on every mutation:
//!
//! - `outgoing`: node id -> ids of edges whose source is the node
//! - `incoming`: node id -> ids of edges whose target is the node
//! - `children`: group id -> ids of nodes parented under it

use crate::events::Event;
use crate::identity::{derive_edge_id, derive_group_id, derive_node_id};
use crate::primitives::MAX_BATCH_LENGTH;
use crate::selector::Selector;
use crate::types::{Attributes, Edge, EdgeSpec, ElementRef, Node, NodeSpec, ReconError, Selection, kind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Extra edge keys that would collide with the stored edge's own fields.
const RESERVED_EDGE_KEYS: [&str; 2] = ["id", "target"];

// =============================================================================
// UPSERT REPORT
// =============================================================================

/// Outcome of one batch upsert.
#[derive(Debug, Clone, Default)]
pub struct UpsertReport {
    /// Every node created or merged, in batch order.
    pub nodes: Selection,
    /// Ids of every edge created or merged.
    pub edges: Vec<String>,
    /// Per-element failures. The batch never aborts on these.
    pub events: Vec<Event>,
}

impl UpsertReport {
    /// Number of per-element failures.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.events.len()
    }
}

// =============================================================================
// GRAPH
// =============================================================================

/// The graph store.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeMap<String, Node>,
    edges: BTreeMap<String, Edge>,
    outgoing: BTreeMap<String, BTreeSet<String>>,
    incoming: BTreeMap<String, BTreeSet<String>>,
    children: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    #[must_use]
    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Check whether a referenced element is stored.
    #[must_use]
    pub fn contains(&self, element: &ElementRef) -> bool {
        match element {
            ElementRef::Node(id) => self.nodes.contains_key(id),
            ElementRef::Edge(id) => self.edges.contains_key(id),
        }
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All edges in id order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Edges whose source is `id`.
    pub fn outgoing_edges<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.indexed_edges(self.outgoing.get(id))
    }

    /// Edges whose target is `id`.
    pub fn incoming_edges<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.indexed_edges(self.incoming.get(id))
    }

    /// Edges incident to `id`, each once (loops included once).
    #[must_use]
    pub fn connected_edges(&self, id: &str) -> Vec<&Edge> {
        let ids: BTreeSet<&String> = self
            .outgoing
            .get(id)
            .into_iter()
            .chain(self.incoming.get(id))
            .flatten()
            .collect();
        ids.into_iter().filter_map(|edge| self.edges.get(edge)).collect()
    }

    /// Number of incident edges.
    #[must_use]
    pub fn degree(&self, id: &str) -> u64 {
        self.connected_edges(id).len() as u64
    }

    /// Ids of the nodes parented under `id`.
    pub fn children_of<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.children
            .get(id)
            .into_iter()
            .flat_map(|ids| ids.iter().map(String::as_str))
    }

    #[must_use]
    pub fn has_children(&self, id: &str) -> bool {
        self.children.get(id).is_some_and(|ids| !ids.is_empty())
    }

    fn indexed_edges<'a>(
        &'a self,
        ids: Option<&'a BTreeSet<String>>,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        ids.into_iter()
            .flatten()
            .filter_map(|edge| self.edges.get(edge))
    }

    // -------------------------------------------------------------------------
    // Query
    // -------------------------------------------------------------------------

    /// Every element, nodes first.
    #[must_use]
    pub fn all_elements(&self) -> Selection {
        self.nodes
            .keys()
            .map(|id| ElementRef::Node(id.clone()))
            .chain(self.edges.keys().map(|id| ElementRef::Edge(id.clone())))
            .collect()
    }

    /// Elements matching a selector, nodes first.
    #[must_use]
    pub fn query(&self, selector: &Selector) -> Selection {
        let nodes = self
            .nodes
            .values()
            .filter(|node| selector.matches_node(self, node))
            .map(|node| ElementRef::Node(node.id.clone()));
        let edges = self
            .edges
            .values()
            .filter(|edge| selector.matches_edge(self, edge))
            .map(|edge| ElementRef::Edge(edge.id.clone()));
        nodes.chain(edges).collect()
    }

    // -------------------------------------------------------------------------
    // Upsert
    // -------------------------------------------------------------------------

    /// Create or merge a batch of node specs and their declared edges.
    ///
    /// Nodes are applied first, then parents, then edges, so an edge may
    /// name a source created later in the same batch. Per-element failures
    /// are recorded in the report and the element is skipped.
    pub fn upsert_elements(&mut self, specs: Vec<NodeSpec>) -> Result<UpsertReport, ReconError> {
        if specs.len() > MAX_BATCH_LENGTH {
            return Err(ReconError::InvalidSpec(format!(
                "batch of {} specs exceeds maximum of {MAX_BATCH_LENGTH}",
                specs.len()
            )));
        }

        let mut report = UpsertReport::default();
        let mut parents: Vec<(String, String)> = Vec::new();
        let mut edges: Vec<(String, EdgeSpec)> = Vec::new();

        for spec in specs {
            let id = match resolve_id(&spec) {
                Ok(id) => id,
                Err(reason) => {
                    report.events.push(Event::error(reason));
                    continue;
                }
            };

            if let Err(reason) = self.merge_node(&id, &spec) {
                report.events.push(Event::error(format!("node {id}: {reason}")));
                continue;
            }

            if let Some(parent) = spec.parent {
                parents.push((id.clone(), parent));
            }
            edges.extend(spec.edges.into_iter().map(|edge| (id.clone(), edge)));
            report.nodes.push(ElementRef::Node(id));
        }

        for (id, parent) in parents {
            let parent = (!parent.is_empty()).then_some(parent.as_str());
            if let Err(e) = self.set_parent(&id, parent) {
                report.events.push(Event::error(format!("node {id}: {e}")));
            }
        }

        for (target, spec) in edges {
            match self.merge_edge(&target, &spec) {
                Ok(edge_id) => report.edges.push(edge_id),
                Err(reason) => report.events.push(Event::error(reason)),
            }
        }

        Ok(report)
    }

    fn merge_node(&mut self, id: &str, spec: &NodeSpec) -> Result<(), String> {
        let mut data = spec.data.clone();
        let weight = match data.remove("weight") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_u64()
                    .ok_or_else(|| format!("weight must be a non-negative integer, got {value}"))?,
            ),
        };

        let node_type = spec.node_type.as_deref().filter(|t| !t.is_empty());
        let label = spec.label.as_deref().filter(|l| !l.is_empty());

        if let Some(node) = self.nodes.get_mut(id) {
            if let Some(node_type) = node_type {
                node.node_type = node_type.to_string();
            }
            if let Some(label) = label {
                node.label = label.to_string();
            }
            if let Some(props) = &spec.props {
                merge_shallow(&mut node.props, props.clone());
            }
            merge_shallow(&mut node.data, data);
            if let Some(weight) = weight {
                node.weight = weight;
            }
            return Ok(());
        }

        let node_type = node_type.ok_or_else(|| "missing type on creation".to_string())?;
        let mut node = Node::new(id, node_type, spec.label.clone().unwrap_or_default());
        node.props = spec.props.clone().unwrap_or_default();
        node.data = data;
        node.weight = weight.unwrap_or(0);
        self.nodes.insert(id.to_string(), node);
        Ok(())
    }

    fn merge_edge(&mut self, target: &str, spec: &EdgeSpec) -> Result<String, String> {
        let source = spec.source();
        if source.is_empty() {
            return Err(format!("edge into {target}: missing source"));
        }
        if !self.nodes.contains_key(source) {
            return Err(format!("edge into {target}: source {source} does not exist"));
        }

        let edge_type = spec.edge_type();
        let id = derive_edge_id(edge_type, source, target);
        let mut data = spec.data().cloned().unwrap_or_default();
        for key in RESERVED_EDGE_KEYS {
            data.remove(key);
        }

        if let Some(edge) = self.edges.get_mut(&id) {
            merge_shallow(&mut edge.data, data);
        } else {
            self.insert_edge(Edge {
                id: id.clone(),
                source: source.to_string(),
                target: target.to_string(),
                edge_type: edge_type.to_string(),
                data,
            });
        }
        Ok(id)
    }

    fn insert_edge(&mut self, edge: Edge) {
        self.outgoing
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.id.clone());
        self.incoming
            .entry(edge.target.clone())
            .or_default()
            .insert(edge.id.clone());
        self.edges.insert(edge.id.clone(), edge);
    }

    // -------------------------------------------------------------------------
    // Grouping & weights
    // -------------------------------------------------------------------------

    /// Set or clear the parent of a node, keeping the children index in sync.
    ///
    /// The parent must exist, must not be the node itself and must not be
    /// one of its descendants.
    pub fn set_parent(&mut self, id: &str, parent: Option<&str>) -> Result<(), ReconError> {
        if !self.nodes.contains_key(id) {
            return Err(ReconError::NodeNotFound(id.to_string()));
        }
        if let Some(parent) = parent {
            if !self.nodes.contains_key(parent) {
                return Err(ReconError::NodeNotFound(parent.to_string()));
            }
            if parent == id || self.is_ancestor(id, parent) {
                return Err(ReconError::InvalidSpec(format!(
                    "parenting {id} under {parent} would create a cycle"
                )));
            }
        }

        let Some(node) = self.nodes.get_mut(id) else {
            return Err(ReconError::NodeNotFound(id.to_string()));
        };
        let previous = std::mem::replace(&mut node.parent, parent.map(str::to_string));

        if let Some(previous) = previous {
            self.detach_child(&previous, id);
        }
        if let Some(parent) = parent {
            self.children
                .entry(parent.to_string())
                .or_default()
                .insert(id.to_string());
        }
        Ok(())
    }

    fn detach_child(&mut self, parent: &str, id: &str) {
        if let Some(siblings) = self.children.get_mut(parent) {
            siblings.remove(id);
            if siblings.is_empty() {
                self.children.remove(parent);
            }
        }
    }

    /// Check whether `ancestor` appears on the parent chain of `id`.
    fn is_ancestor(&self, ancestor: &str, id: &str) -> bool {
        let mut visited = BTreeSet::new();
        let mut current = self.nodes.get(id).and_then(|node| node.parent.as_deref());
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            if !visited.insert(parent) {
                return false;
            }
            current = self.nodes.get(parent).and_then(|node| node.parent.as_deref());
        }
        false
    }

    /// Ensure a group node for `label` exists and return its id.
    pub fn ensure_group(&mut self, label: &str) -> String {
        let id = derive_group_id(label);
        self.nodes
            .entry(id.clone())
            .or_insert_with(|| Node::new(id.clone(), kind::GROUP, label));
        id
    }

    /// Overwrite the derived weight of a node.
    pub fn set_weight(&mut self, id: &str, weight: u64) -> Result<(), ReconError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| ReconError::NodeNotFound(id.to_string()))?;
        node.weight = weight;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------

    /// Remove the referenced elements.
    ///
    /// A removed node takes its incident edges with it and releases its
    /// children. Returns every element actually removed.
    pub fn remove(&mut self, selection: &Selection) -> Selection {
        let mut removed = Selection::new();
        for element in selection.iter() {
            match element {
                ElementRef::Node(id) => self.remove_node(id, &mut removed),
                ElementRef::Edge(id) => {
                    if self.remove_edge(id) {
                        removed.push(ElementRef::Edge(id.clone()));
                    }
                }
            }
        }
        removed
    }

    fn remove_node(&mut self, id: &str, removed: &mut Selection) {
        if !self.nodes.contains_key(id) {
            return;
        }

        let incident: Vec<String> = self
            .connected_edges(id)
            .into_iter()
            .map(|edge| edge.id.clone())
            .collect();
        for edge in incident {
            if self.remove_edge(&edge) {
                removed.push(ElementRef::Edge(edge));
            }
        }

        for child in self.children.remove(id).unwrap_or_default() {
            if let Some(node) = self.nodes.get_mut(&child) {
                node.parent = None;
            }
        }

        if let Some(node) = self.nodes.remove(id) {
            if let Some(parent) = node.parent {
                self.detach_child(&parent, id);
            }
            removed.push(ElementRef::Node(node.id));
        }
        self.outgoing.remove(id);
        self.incoming.remove(id);
    }

    fn remove_edge(&mut self, id: &str) -> bool {
        let Some(edge) = self.edges.remove(id) else {
            return false;
        };
        for (index, endpoint) in [
            (&mut self.outgoing, &edge.source),
            (&mut self.incoming, &edge.target),
        ] {
            if let Some(ids) = index.get_mut(endpoint) {
                ids.remove(id);
                if ids.is_empty() {
                    index.remove(endpoint);
                }
            }
        }
        true
    }
}

/// Resolve the id a spec upserts into.
fn resolve_id(spec: &NodeSpec) -> Result<String, String> {
    match spec.id.as_deref() {
        Some("") => Err("node spec has an empty id".to_string()),
        Some(id) => Ok(id.to_string()),
        None => {
            let node_type = spec
                .node_type
                .as_deref()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| "node spec has neither id nor type".to_string())?;
            Ok(derive_node_id(node_type, spec.label.as_deref().unwrap_or("")))
        }
    }
}

/// Shallow merge: incoming keys overwrite, absent keys are kept.
fn merge_shallow(target: &mut Attributes, incoming: Attributes) {
    for (key, value) in incoming {
        target.insert(key, value);
    }
}

// =============================================================================
// STRUCTURAL FORM
// =============================================================================

/// Plain structural form of a graph (`{"nodes": [...], "edges": [...]}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerializableGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl From<&Graph> for SerializableGraph {
    fn from(graph: &Graph) -> Self {
        Self {
            nodes: graph.nodes.values().cloned().collect(),
            edges: graph.edges.values().cloned().collect(),
        }
    }
}

impl From<SerializableGraph> for Graph {
    /// Rebuild a graph. Edges with missing endpoints and parents that do
    /// not resolve are dropped.
    fn from(sg: SerializableGraph) -> Self {
        let mut graph = Graph::new();
        let mut parents = Vec::new();

        for mut node in sg.nodes {
            if let Some(parent) = node.parent.take() {
                parents.push((node.id.clone(), parent));
            }
            graph.nodes.insert(node.id.clone(), node);
        }

        for (id, parent) in parents {
            if let Err(e) = graph.set_parent(&id, Some(&parent)) {
                tracing::warn!(node = %id, parent = %parent, error = %e, "dropping unresolved parent");
            }
        }

        for edge in sg.edges {
            if graph.nodes.contains_key(&edge.source) && graph.nodes.contains_key(&edge.target) {
                graph.insert_edge(edge);
            }
        }

        graph
    }
}

// =============================================================================
// TESTS
// =============================================================================
