//! # Session Module
//!
//! A session owns the graph and the working set.
//!
//! - The working set is volatile, session-local state
//! - It is never serialized with the graph
//! - It never references an element that is not in the graph
//!
//! Every engine operation takes the session explicitly; there is no
//! ambient "current selection". Operations that accept an optional
//! selection fall back to the working set.

use crate::events::{Event, EventSink, TracingSink};
use crate::graph::{Graph, SerializableGraph, UpsertReport};
use crate::selector::Selector;
use crate::traverse::TraversalPipeline;
use crate::types::{Node, NodeSpec, ReconError, Selection};
use std::fmt;
use std::sync::Arc;

/// Graph plus working set.
pub struct Session {
    graph: Graph,
    selection: Selection,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("graph", &self.graph)
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Empty session reporting through `tracing`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }

    /// Empty session reporting through the given sink.
    #[must_use]
    pub fn with_sink(sink: Arc<dyn EventSink>) -> Self {
        Self {
            graph: Graph::new(),
            selection: Selection::new(),
            sink,
        }
    }

    /// Session over an existing graph. Every node starts in the working set.
    #[must_use]
    pub fn with_graph(graph: Graph) -> Self {
        Self {
            selection: graph.all_elements().nodes_only(),
            graph,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The working set.
    #[must_use]
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Handle to the session's event sink.
    #[must_use]
    pub fn sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.sink)
    }

    pub fn set_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sink = sink;
    }

    /// Snapshot of the selected nodes' attribute maps.
    #[must_use]
    pub fn selected_nodes(&self) -> Vec<Node> {
        self.selection
            .node_ids()
            .filter_map(|id| self.graph.node(id).cloned())
            .collect()
    }

    fn target(&self, selection: Option<&Selection>) -> Selection {
        selection.unwrap_or(&self.selection).clone()
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Upsert a batch. The affected nodes become the working set.
    pub fn upsert(&mut self, specs: Vec<NodeSpec>) -> Result<UpsertReport, ReconError> {
        let report = self.graph.upsert_elements(specs)?;
        for event in &report.events {
            self.sink.emit(event);
        }
        self.selection = report.nodes.clone();
        Ok(report)
    }

    /// Remove elements (default: the working set). Returns what was removed.
    pub fn remove(&mut self, selection: Option<&Selection>) -> Selection {
        let target = self.target(selection);
        let removed = self.graph.remove(&target);
        let graph = &self.graph;
        self.selection.retain(|element| graph.contains(element));
        removed
    }

    // -------------------------------------------------------------------------
    // Selection & traversal
    // -------------------------------------------------------------------------

    /// Replace the working set with the union of the matched nodes.
    ///
    /// Edges only enter the working set through traversal. Blank expressions are ignored; no expressions clears the set. All
    /// expressions are parsed before the working set changes.
    pub fn select<S: AsRef<str>>(&mut self, expressions: &[S]) -> Result<&Selection, ReconError> {
        let selectors = expressions
            .iter()
            .map(AsRef::as_ref)
            .filter(|expression| !expression.trim().is_empty())
            .map(Selector::parse)
            .collect::<Result<Vec<_>, _>>()?;

        let mut selection = Selection::new();
        for selector in &selectors {
            selection.extend_from(&self.graph.query(selector).nodes_only());
        }
        self.selection = selection;
        Ok(&self.selection)
    }

    /// Clear the working set.
    pub fn unselect(&mut self) {
        self.selection.clear();
    }

    /// Replace the working set with the result of a traversal pipeline.
    ///
    /// On error the working set and the graph are left untouched.
    pub fn traverse<S: AsRef<str>>(&mut self, expressions: &[S]) -> Result<&Selection, ReconError> {
        let pipeline = TraversalPipeline::parse(expressions)?;
        self.selection = pipeline.execute(&self.graph);
        Ok(&self.selection)
    }

    /// Clear the working set.
    pub fn untraverse(&mut self) {
        self.selection.clear();
    }

    // -------------------------------------------------------------------------
    // Grouping & measurement
    // -------------------------------------------------------------------------

    /// Reparent the selected nodes under the group node for `label`,
    /// creating it when missing. Returns the group id.
    pub fn group(&mut self, label: &str, selection: Option<&Selection>) -> String {
        let target = self.target(selection);
        let group = self.graph.ensure_group(label);
        for id in target.node_ids().filter(|id| *id != group) {
            if let Err(e) = self.graph.set_parent(id, Some(&group)) {
                self.sink.emit(&Event::warn(format!("cannot group {id}: {e}")));
            }
        }
        group
    }

    /// Detach the selected nodes from their parents. Group nodes stay.
    pub fn ungroup(&mut self, selection: Option<&Selection>) -> usize {
        let target = self.target(selection);
        target
            .node_ids()
            .filter(|id| self.graph.set_parent(id, None).is_ok())
            .count()
    }

    /// Set each selected node's weight to its incident-edge count.
    pub fn measure(&mut self, selection: Option<&Selection>) -> usize {
        let target = self.target(selection);
        target
            .node_ids()
            .filter(|id| {
                let degree = self.graph.degree(id);
                self.graph.set_weight(id, degree).is_ok()
            })
            .count()
    }

    /// Reset each selected node's weight to zero.
    pub fn unmeasure(&mut self, selection: Option<&Selection>) -> usize {
        let target = self.target(selection);
        target
            .node_ids()
            .filter(|id| self.graph.set_weight(id, 0).is_ok())
            .count()
    }

    // -------------------------------------------------------------------------
    // Structural form
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn serialize(&self) -> SerializableGraph {
        SerializableGraph::from(&self.graph)
    }

    /// Replace the graph and clear the working set.
    pub fn deserialize(&mut self, form: SerializableGraph) {
        self.graph = Graph::from(form);
        self.selection.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollectingSink, EventLevel};
    use crate::identity::{derive_group_id, derive_node_id};
    use crate::types::ElementRef;

    fn seeded() -> Session {
        let mut session = Session::new();
        session
            .upsert(vec![
                NodeSpec::new("domain", "example.com").with_id("d"),
                NodeSpec::new("ipv4", "10.0.0.1").with_id("i").with_edge("d"),
                NodeSpec::new("org", "ACME").with_id("o"),
            ])
            .expect("upsert");
        session
    }

    #[test]
    fn upsert_replaces_working_set() {
        let mut session = seeded();
        assert_eq!(session.selection().len(), 3);

        session
            .upsert(vec![NodeSpec::new("domain", "other.com")])
            .expect("upsert");
        let ids: Vec<_> = session.selection().node_ids().collect();
        assert_eq!(ids, vec![derive_node_id("domain", "other.com")]);
    }

    #[test]
    fn upsert_forwards_element_errors_to_sink() {
        let sink = Arc::new(CollectingSink::new());
        let mut session = Session::with_sink(sink.clone());
        let report = session
            .upsert(vec![NodeSpec::default().with_id("x")])
            .expect("upsert");

        assert_eq!(report.error_count(), 1);
        assert_eq!(sink.count(EventLevel::Error), 1);
    }

    #[test]
    fn select_unions_and_clears() {
        let mut session = seeded();
        let selected = session
            .select(&["[type = \"domain\"]", "  ", "[type = \"org\"]"])
            .expect("select");
        assert_eq!(selected.node_ids().collect::<Vec<_>>(), vec!["d", "o"]);

        let empty: [&str; 0] = [];
        assert!(session.select(&empty).expect("select").is_empty());
    }

    #[test]
    fn select_matches_nodes_only() {
        let mut session = seeded();
        let selected = session.select(&["*"]).expect("select");
        assert_eq!(selected.len(), 3);
        assert_eq!(selected.node_ids().count(), 3);
        assert!(selected.iter().all(ElementRef::is_node));

        let edges = session.select(&["edge"]).expect("select");
        assert!(edges.is_empty());
    }

    #[test]
    fn loaded_session_works_on_whole_graph() {
        let graph = Graph::from(seeded().serialize());
        let session = Session::with_graph(graph);
        assert_eq!(session.selection().node_ids().collect::<Vec<_>>(), vec!["d", "i", "o"]);
        assert!(session.selection().iter().all(ElementRef::is_node));
    }

    #[test]
    fn failed_select_keeps_working_set() {
        let mut session = seeded();
        session.select(&["#d"]).expect("select");
        assert!(session.select(&["#d", "node["]).is_err());
        assert_eq!(session.selection().len(), 1);
    }

    #[test]
    fn failed_traverse_leaves_everything_untouched() {
        let mut session = seeded();
        session.select(&["#o"]).expect("select");
        let before = session.serialize();

        assert!(session.traverse(&["nodes | explode"]).is_err());
        assert_eq!(session.serialize(), before);
        assert_eq!(session.selection().node_ids().collect::<Vec<_>>(), vec!["o"]);
    }

    #[test]
    fn group_and_ungroup() {
        let mut session = seeded();
        session.select(&["#d", "#i"]).expect("select");
        let group = session.group("Hosts", None);

        assert_eq!(group, derive_group_id("Hosts"));
        assert_eq!(session.graph().children_of(&group).count(), 2);

        session.ungroup(None);
        assert!(!session.graph().has_children(&group));
        assert!(session.graph().contains_node(&group));
    }

    #[test]
    fn measure_and_unmeasure() {
        let mut session = seeded();
        session.select(&["node"]).expect("select");
        session.measure(None);
        assert_eq!(session.graph().node("d").map(|n| n.weight), Some(1));
        assert_eq!(session.graph().node("o").map(|n| n.weight), Some(0));

        session.unmeasure(None);
        assert_eq!(session.graph().node("d").map(|n| n.weight), Some(0));
    }

    #[test]
    fn remove_prunes_working_set() {
        let mut session = seeded();
        session.select(&["node"]).expect("select");
        let target = Selection::from_iter([ElementRef::Node("d".into())]);
        let removed = session.remove(Some(&target));

        assert_eq!(removed.len(), 2);
        assert_eq!(session.selection().node_ids().collect::<Vec<_>>(), vec!["i", "o"]);
    }

    #[test]
    fn deserialize_clears_working_set() {
        let mut session = seeded();
        let form = session.serialize();
        session.deserialize(form);
        assert!(session.selection().is_empty());
        assert_eq!(session.graph().node_count(), 3);
    }
}
