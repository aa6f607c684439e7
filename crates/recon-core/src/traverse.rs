//! # Traversal Pipelines
//!
//! Multi-step traversal over the whole graph.
//!
//! An expression is split on `|` into steps of the form
//! `functionName [selector]`. Several expressions concatenate into one
//! pipeline. Execution starts from every element in the graph and feeds
//! each step's result into the next; the optional selector filters the
//! step's output and defaults to `*`.
//!
//! Every step is parsed and validated before anything runs, so an unknown
//! function or a bad selector fails the whole traversal.

use crate::graph::Graph;
use crate::primitives::{MAX_TRAVERSAL_STEPS, TRAVERSE_SEPARATOR, WILDCARD};
use crate::selector::Selector;
use crate::types::{ElementRef, ReconError, Selection};
use std::collections::{BTreeSet, VecDeque};

// =============================================================================
// TRAVERSAL FUNCTIONS
// =============================================================================

/// A traversal primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraverseFn {
    Nodes,
    Edges,
    Filter,
    Not,
    Neighborhood,
    OpenNeighborhood,
    ClosedNeighborhood,
    Outgoers,
    Incomers,
    Successors,
    Predecessors,
    ConnectedEdges,
    ConnectedNodes,
    Sources,
    Targets,
    Parent,
    Parents,
    Ancestors,
    Children,
    Descendants,
    Siblings,
    Roots,
    Leaves,
}

impl TraverseFn {
    /// Every primitive, in documentation order.
    pub const ALL: [TraverseFn; 23] = [
        Self::Nodes,
        Self::Edges,
        Self::Filter,
        Self::Not,
        Self::Neighborhood,
        Self::OpenNeighborhood,
        Self::ClosedNeighborhood,
        Self::Outgoers,
        Self::Incomers,
        Self::Successors,
        Self::Predecessors,
        Self::ConnectedEdges,
        Self::ConnectedNodes,
        Self::Sources,
        Self::Targets,
        Self::Parent,
        Self::Parents,
        Self::Ancestors,
        Self::Children,
        Self::Descendants,
        Self::Siblings,
        Self::Roots,
        Self::Leaves,
    ];

    /// Canonical camel-case name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Nodes => "nodes",
            Self::Edges => "edges",
            Self::Filter => "filter",
            Self::Not => "not",
            Self::Neighborhood => "neighborhood",
            Self::OpenNeighborhood => "openNeighborhood",
            Self::ClosedNeighborhood => "closedNeighborhood",
            Self::Outgoers => "outgoers",
            Self::Incomers => "incomers",
            Self::Successors => "successors",
            Self::Predecessors => "predecessors",
            Self::ConnectedEdges => "connectedEdges",
            Self::ConnectedNodes => "connectedNodes",
            Self::Sources => "sources",
            Self::Targets => "targets",
            Self::Parent => "parent",
            Self::Parents => "parents",
            Self::Ancestors => "ancestors",
            Self::Children => "children",
            Self::Descendants => "descendants",
            Self::Siblings => "siblings",
            Self::Roots => "roots",
            Self::Leaves => "leaves",
        }
    }

    /// Look a primitive up by name, ignoring case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|function| function.name().eq_ignore_ascii_case(name))
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// One parsed step.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalStep {
    pub function: TraverseFn,
    pub selector: Selector,
}

/// A validated traversal pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraversalPipeline {
    steps: Vec<TraversalStep>,
}

impl TraversalPipeline {
    /// Parse one or more traversal expressions into a single pipeline.
    pub fn parse<S: AsRef<str>>(expressions: &[S]) -> Result<Self, ReconError> {
        let mut steps = Vec::new();
        for expression in expressions {
            for part in split_steps(expression.as_ref()) {
                let (name, argument) = match part.split_once(char::is_whitespace) {
                    Some((name, rest)) => (name, rest.trim()),
                    None => (part, ""),
                };
                let function = TraverseFn::from_name(name)
                    .ok_or_else(|| ReconError::UnknownTraversal(name.to_lowercase()))?;
                let selector = if argument.is_empty() || argument == WILDCARD {
                    Selector::any()
                } else {
                    Selector::parse(argument)?
                };
                steps.push(TraversalStep { function, selector });
            }
        }
        if steps.len() > MAX_TRAVERSAL_STEPS {
            return Err(ReconError::InvalidSelector {
                selector: expressions
                    .iter()
                    .map(|e| e.as_ref())
                    .collect::<Vec<_>>()
                    .join(" | "),
                reason: format!("more than {MAX_TRAVERSAL_STEPS} traversal steps"),
            });
        }
        Ok(Self { steps })
    }

    #[must_use]
    pub fn steps(&self) -> &[TraversalStep] {
        &self.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the pipeline from every element of the graph.
    #[must_use]
    pub fn execute(&self, graph: &Graph) -> Selection {
        self.steps
            .iter()
            .fold(graph.all_elements(), |current, step| {
                apply(graph, step, &current)
            })
    }
}

/// Split an expression on `|`, ignoring separators inside quoted values.
fn split_steps(expression: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in expression.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (None, '"' | '\'') => quote = Some(c),
            (None, c) if c == TRAVERSE_SEPARATOR => {
                parts.push(&expression[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&expression[start..]);
    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

// =============================================================================
// STEP EXECUTION
// =============================================================================

fn apply(graph: &Graph, step: &TraversalStep, input: &Selection) -> Selection {
    let selector = &step.selector;
    let output = match step.function {
        TraverseFn::Filter => return matching(graph, input, selector, true),
        TraverseFn::Not => return matching(graph, input, selector, false),
        TraverseFn::Nodes => input.nodes_only(),
        TraverseFn::Edges => input.iter().filter(|e| !e.is_node()).cloned().collect(),
        TraverseFn::Neighborhood | TraverseFn::OpenNeighborhood => neighborhood(graph, input),
        TraverseFn::ClosedNeighborhood => {
            let mut closed = input.nodes_only();
            closed.extend_from(&neighborhood(graph, input));
            closed
        }
        TraverseFn::Outgoers => outgoers(graph, input),
        TraverseFn::Incomers => incomers(graph, input),
        TraverseFn::Successors => closure(graph, input, outgoers),
        TraverseFn::Predecessors => closure(graph, input, incomers),
        TraverseFn::ConnectedEdges => connected_edges(graph, input),
        TraverseFn::ConnectedNodes => edge_endpoints(graph, input, true, true),
        TraverseFn::Sources => edge_endpoints(graph, input, true, false),
        TraverseFn::Targets => edge_endpoints(graph, input, false, true),
        TraverseFn::Parent => parents(graph, input),
        TraverseFn::Parents | TraverseFn::Ancestors => closure(graph, input, parents),
        TraverseFn::Children => children(graph, input),
        TraverseFn::Descendants => closure(graph, input, children),
        TraverseFn::Siblings => siblings(graph, input),
        TraverseFn::Roots => nodes_without(graph, input, |graph, id| {
            graph.incoming_edges(id).any(|edge| !edge.is_loop())
        }),
        TraverseFn::Leaves => nodes_without(graph, input, |graph, id| {
            graph.outgoing_edges(id).any(|edge| !edge.is_loop())
        }),
    };

    matching(graph, &output, selector, true)
}

fn matching(graph: &Graph, input: &Selection, selector: &Selector, keep: bool) -> Selection {
    input
        .iter()
        .filter(|element| {
            let matched = match element {
                ElementRef::Node(id) => graph
                    .node(id)
                    .is_some_and(|node| selector.matches_node(graph, node)),
                ElementRef::Edge(id) => graph
                    .edge(id)
                    .is_some_and(|edge| selector.matches_edge(graph, edge)),
            };
            matched == keep
        })
        .cloned()
        .collect()
}

/// Connected edges and the nodes across them, excluding the input nodes
/// themselves unless reached from another input node.
fn neighborhood(graph: &Graph, input: &Selection) -> Selection {
    let mut out = Selection::new();
    for id in input.node_ids() {
        for edge in graph.connected_edges(id) {
            out.push(ElementRef::Edge(edge.id.clone()));
            let other = if edge.source == id { &edge.target } else { &edge.source };
            if other != id {
                out.push(ElementRef::Node(other.clone()));
            }
        }
    }
    out
}

fn outgoers(graph: &Graph, input: &Selection) -> Selection {
    let mut out = Selection::new();
    for id in input.node_ids() {
        for edge in graph.outgoing_edges(id) {
            out.push(ElementRef::Edge(edge.id.clone()));
            out.push(ElementRef::Node(edge.target.clone()));
        }
    }
    out
}

fn incomers(graph: &Graph, input: &Selection) -> Selection {
    let mut out = Selection::new();
    for id in input.node_ids() {
        for edge in graph.incoming_edges(id) {
            out.push(ElementRef::Edge(edge.id.clone()));
            out.push(ElementRef::Node(edge.source.clone()));
        }
    }
    out
}

fn connected_edges(graph: &Graph, input: &Selection) -> Selection {
    input
        .node_ids()
        .flat_map(|id| graph.connected_edges(id))
        .map(|edge| ElementRef::Edge(edge.id.clone()))
        .collect()
}

fn edge_endpoints(graph: &Graph, input: &Selection, sources: bool, targets: bool) -> Selection {
    let mut out = Selection::new();
    for edge in input.edge_ids().filter_map(|id| graph.edge(id)) {
        if sources {
            out.push(ElementRef::Node(edge.source.clone()));
        }
        if targets {
            out.push(ElementRef::Node(edge.target.clone()));
        }
    }
    out
}

fn parents(graph: &Graph, input: &Selection) -> Selection {
    input
        .node_ids()
        .filter_map(|id| graph.node(id)?.parent.clone())
        .map(ElementRef::Node)
        .collect()
}

fn children(graph: &Graph, input: &Selection) -> Selection {
    input
        .node_ids()
        .flat_map(|id| graph.children_of(id))
        .map(|id| ElementRef::Node(id.to_string()))
        .collect()
}

/// Nodes sharing a parent with an input node. Orphans are siblings of
/// every other orphan.
fn siblings(graph: &Graph, input: &Selection) -> Selection {
    let mut out = Selection::new();
    for id in input.node_ids() {
        let Some(node) = graph.node(id) else {
            continue;
        };
        let candidates: Vec<&str> = match &node.parent {
            Some(parent) => graph.children_of(parent).collect(),
            None => graph
                .nodes()
                .filter(|other| other.parent.is_none())
                .map(|other| other.id.as_str())
                .collect(),
        };
        for candidate in candidates {
            if candidate != id {
                out.push(ElementRef::Node(candidate.to_string()));
            }
        }
    }
    out
}

/// Input nodes for which `has` does not hold.
fn nodes_without(graph: &Graph, input: &Selection, has: impl Fn(&Graph, &str) -> bool) -> Selection {
    input
        .node_ids()
        .filter(|id| !has(graph, id))
        .map(|id| ElementRef::Node(id.to_string()))
        .collect()
}

/// Repeatedly apply `step` breadth-first, collecting everything reached.
fn closure(graph: &Graph, input: &Selection, step: fn(&Graph, &Selection) -> Selection) -> Selection {
    let mut out = Selection::new();
    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = input.node_ids().map(str::to_string).collect();

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id.clone()) {
            continue;
        }
        let frontier = step(graph, &Selection::from_iter([ElementRef::Node(id)]));
        for element in frontier.iter() {
            if !out.push(element.clone()) {
                continue;
            }
            if let ElementRef::Node(next) = element {
                queue.push_back(next.clone());
            }
        }
    }
    out
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeSpec;

    /// a -> b -> c, plus d (isolated) and a group g holding b and c.
    fn chain() -> Graph {
        let mut graph = Graph::new();
        graph
            .upsert_elements(vec![
                NodeSpec::new("domain", "a").with_id("a"),
                NodeSpec::new("ipv4", "b").with_id("b").with_edge("a"),
                NodeSpec::new("port", "c").with_id("c").with_edge("b"),
                NodeSpec::new("org", "d").with_id("d"),
            ])
            .expect("upsert");
        let group = graph.ensure_group("g");
        graph.set_parent("b", Some(&group)).expect("parent");
        graph.set_parent("c", Some(&group)).expect("parent");
        graph
    }

    fn node_ids(selection: &Selection) -> Vec<&str> {
        selection.node_ids().collect()
    }

    fn run(graph: &Graph, expression: &str) -> Selection {
        TraversalPipeline::parse(&[expression])
            .expect("parse")
            .execute(graph)
    }

    #[test]
    fn names_match_case_insensitively() {
        assert_eq!(TraverseFn::from_name("OUTGOERS"), Some(TraverseFn::Outgoers));
        assert_eq!(
            TraverseFn::from_name("closedneighborhood"),
            Some(TraverseFn::ClosedNeighborhood)
        );
        assert_eq!(TraverseFn::from_name("bogus"), None);
    }

    #[test]
    fn unknown_function_fails_whole_pipeline() {
        let err = TraversalPipeline::parse(&["nodes | Bogus * | roots"]).expect_err("must fail");
        assert!(matches!(err, ReconError::UnknownTraversal(ref name) if name == "bogus"));
        assert_eq!(err.to_string(), "Unrecognized traverse function bogus");
    }

    #[test]
    fn filter_then_outgoers() {
        let graph = chain();
        let result = run(&graph, "filter #a | outgoers node");
        assert_eq!(node_ids(&result), vec!["b"]);
        assert_eq!(result.edge_ids().count(), 0);
    }

    #[test]
    fn successors_and_predecessors() {
        let graph = chain();
        assert_eq!(node_ids(&run(&graph, "filter #a | successors node")), vec!["b", "c"]);
        assert_eq!(node_ids(&run(&graph, "filter #c | predecessors node")), vec!["b", "a"]);
    }

    #[test]
    fn roots_and_leaves() {
        let graph = chain();
        let roots = run(&graph, "nodes [type != \"group\"] | roots");
        assert_eq!(node_ids(&roots), vec!["a", "d"]);
        let leaves = run(&graph, "nodes [type != \"group\"] | leaves");
        assert_eq!(node_ids(&leaves), vec!["c", "d"]);
    }

    #[test]
    fn compound_functions() {
        let graph = chain();
        let group = crate::identity::derive_group_id("g");

        assert_eq!(node_ids(&run(&graph, "filter #b | parent")), vec![group.as_str()]);
        assert_eq!(
            node_ids(&run(&graph, &format!("filter #{group} | children"))),
            vec!["b", "c"]
        );
        assert_eq!(node_ids(&run(&graph, "filter #b | siblings")), vec!["c"]);
    }

    #[test]
    fn neighborhood_variants() {
        let graph = chain();
        let open = run(&graph, "filter #b | neighborhood");
        assert_eq!(open.len(), 4);
        let closed = run(&graph, "filter #b | closedNeighborhood node");
        assert_eq!(node_ids(&closed), vec!["b", "a", "c"]);
    }

    #[test]
    fn multiple_expressions_concatenate() {
        let graph = chain();
        let pipeline = TraversalPipeline::parse(&["nodes", "not [type = \"group\"] | not #d"])
            .expect("parse");
        assert_eq!(pipeline.len(), 3);
        assert_eq!(node_ids(&pipeline.execute(&graph)), vec!["a", "b", "c"]);
    }

    #[test]
    fn separators_inside_quotes_are_kept() {
        assert_eq!(split_steps("filter [label = \"a|b\"] || nodes"), vec![
            "filter [label = \"a|b\"]",
            "nodes"
        ]);
    }

    #[test]
    fn connected_edges_and_endpoints() {
        let graph = chain();
        let edges = run(&graph, "filter #b | connectedEdges");
        assert_eq!(edges.edge_ids().count(), 2);
        let ends = run(&graph, "filter #b | connectedEdges | sources");
        assert_eq!(node_ids(&ends), vec!["a", "b"]);
    }
}
