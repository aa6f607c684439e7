//! # Selector Module
//!
//! CSS-like selector expressions over nodes and edges.
//!
//! ## Syntax
//!
//! ```text
//! node[type = "domain"][label $= ".example.com"]
//! edge[type = "resolves"]:simple
//! #8f3c...,  node:orphan
//! [?props.ssl]   [!props.ssl]   [^parent]   [props.port >= 1024]
//! ```
//!
//! - `node`, `edge`, `*` restrict the element group
//! - `#id` matches one element id (`\` escapes special characters)
//! - `[path]` / `[^path]` test presence / absence, `[?path]` / `[!path]`
//!   truthiness; `path` may be dotted (`props.domain`)
//! - `[path op value]` with `=`, `!=`, `^=`, `$=`, `*=`, `<`, `<=`, `>`,
//!   `>=`; an `@` before the operator compares strings case-insensitively
//! - `:parent`, `:childless`, `:child`, `:orphan` (nodes), `:loop`,
//!   `:simple` (edges)
//! - juxtaposition is conjunction, `,` is union
//!
//! Combinators (descendant, child) are not part of the language.

use crate::graph::Graph;
use crate::primitives::MAX_SELECTOR_LENGTH;
use crate::types::{Edge, Node, ReconError};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::str::FromStr;

// =============================================================================
// ELEMENT VIEW
// =============================================================================

/// Borrowed view of a stored element, as seen by a selector.
#[derive(Debug, Clone, Copy)]
pub enum ElementView<'a> {
    Node(&'a Node),
    Edge(&'a Edge),
}

impl ElementView<'_> {
    fn id(&self) -> &str {
        match self {
            Self::Node(node) => &node.id,
            Self::Edge(edge) => &edge.id,
        }
    }

    fn attribute(&self, path: &str) -> Option<Value> {
        match self {
            Self::Node(node) => node.attribute(path),
            Self::Edge(edge) => edge.attribute(path),
        }
    }
}

// =============================================================================
// SELECTOR AST
// =============================================================================

/// A parsed selector: a union of compound selectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Compound>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    group: Option<Group>,
    conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    Node,
    Edge,
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Id(String),
    Attribute { path: String, check: Check },
    State(State),
}

#[derive(Debug, Clone, PartialEq)]
enum Check {
    Present,
    Absent,
    Truthy,
    Falsy,
    Compare {
        op: Operator,
        value: Literal,
        case_insensitive: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
    StartsWith,
    EndsWith,
    Contains,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    fn is_numeric(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Text(String),
    Number(Number),
    Bool(bool),
}

impl Literal {
    fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Number(number) => number.to_string(),
            Self::Bool(flag) => flag.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Parent,
    Childless,
    Child,
    Orphan,
    Loop,
    Simple,
}

impl State {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "parent" => Some(Self::Parent),
            "childless" => Some(Self::Childless),
            "child" | "nonorphan" => Some(Self::Child),
            "orphan" => Some(Self::Orphan),
            "loop" => Some(Self::Loop),
            "simple" => Some(Self::Simple),
            _ => None,
        }
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

impl Selector {
    /// Parse a selector expression.
    pub fn parse(input: &str) -> Result<Self, ReconError> {
        if input.len() > MAX_SELECTOR_LENGTH {
            return Err(invalid(
                input,
                format!("exceeds maximum length of {MAX_SELECTOR_LENGTH}"),
            ));
        }
        let alternatives = Parser::new(input).parse_list()?;
        Ok(Self {
            source: input.trim().to_string(),
            alternatives,
        })
    }

    /// The selector matching every element (`*`).
    #[must_use]
    pub fn any() -> Self {
        Self {
            source: "*".to_string(),
            alternatives: vec![Compound::default()],
        }
    }

    /// The expression this selector was parsed from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate the selector against one element.
    #[must_use]
    pub fn matches(&self, graph: &Graph, element: ElementView<'_>) -> bool {
        self.alternatives
            .iter()
            .any(|compound| compound.matches(graph, element))
    }

    #[must_use]
    pub fn matches_node(&self, graph: &Graph, node: &Node) -> bool {
        self.matches(graph, ElementView::Node(node))
    }

    #[must_use]
    pub fn matches_edge(&self, graph: &Graph, edge: &Edge) -> bool {
        self.matches(graph, ElementView::Edge(edge))
    }
}

impl FromStr for Selector {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// MATCHING
// =============================================================================

impl Compound {
    fn matches(&self, graph: &Graph, element: ElementView<'_>) -> bool {
        let group_ok = match (self.group, element) {
            (None, _) | (Some(Group::Node), ElementView::Node(_)) => true,
            (Some(Group::Edge), ElementView::Edge(_)) => true,
            _ => false,
        };
        group_ok
            && self
                .conditions
                .iter()
                .all(|condition| condition.matches(graph, element))
    }
}

impl Condition {
    fn matches(&self, graph: &Graph, element: ElementView<'_>) -> bool {
        match self {
            Self::Id(id) => element.id() == id,
            Self::State(state) => state_matches(*state, graph, element),
            Self::Attribute { path, check } => check.matches(element.attribute(path)),
        }
    }
}

fn state_matches(state: State, graph: &Graph, element: ElementView<'_>) -> bool {
    match (state, element) {
        (State::Parent, ElementView::Node(node)) => graph.has_children(&node.id),
        (State::Childless, ElementView::Node(node)) => !graph.has_children(&node.id),
        (State::Child, ElementView::Node(node)) => node.parent.is_some(),
        (State::Orphan, ElementView::Node(node)) => node.parent.is_none(),
        (State::Loop, ElementView::Edge(edge)) => edge.is_loop(),
        (State::Simple, ElementView::Edge(edge)) => !edge.is_loop(),
        _ => false,
    }
}

impl Check {
    fn matches(&self, value: Option<Value>) -> bool {
        match self {
            Self::Present => value.is_some_and(|v| !v.is_null()),
            Self::Absent => value.is_none_or(|v| v.is_null()),
            Self::Truthy => value.as_ref().is_some_and(is_truthy),
            Self::Falsy => !value.as_ref().is_some_and(is_truthy),
            Self::Compare {
                op: Operator::Ne,
                value: literal,
                case_insensitive,
            } => !equals(value.as_ref(), literal, *case_insensitive),
            Self::Compare {
                op: Operator::Eq,
                value: literal,
                case_insensitive,
            } => equals(value.as_ref(), literal, *case_insensitive),
            Self::Compare {
                op,
                value: literal,
                case_insensitive: _,
            } if op.is_numeric() => {
                let (Some(actual), Literal::Number(expected)) =
                    (value.as_ref().and_then(numeric_of), literal)
                else {
                    return false;
                };
                let Some(ordering) = compare_numbers(&actual, expected) else {
                    return false;
                };
                match op {
                    Operator::Lt => ordering == Ordering::Less,
                    Operator::Le => ordering != Ordering::Greater,
                    Operator::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }
            }
            Self::Compare {
                op,
                value: literal,
                case_insensitive,
            } => {
                let Some(actual) = value.as_ref().and_then(text_of) else {
                    return false;
                };
                let expected = literal.text();
                let (actual, expected) = if *case_insensitive {
                    (actual.to_lowercase(), expected.to_lowercase())
                } else {
                    (actual, expected)
                };
                match op {
                    Operator::StartsWith => actual.starts_with(&expected),
                    Operator::EndsWith => actual.ends_with(&expected),
                    _ => actual.contains(&expected),
                }
            }
        }
    }
}

fn equals(value: Option<&Value>, literal: &Literal, case_insensitive: bool) -> bool {
    let Some(value) = value else {
        return false;
    };
    match literal {
        Literal::Text(expected) => text_of(value).is_some_and(|actual| {
            if case_insensitive {
                actual.to_lowercase() == expected.to_lowercase()
            } else {
                actual == *expected
            }
        }),
        Literal::Number(expected) => numeric_of(value)
            .and_then(|actual| compare_numbers(&actual, expected))
            .is_some_and(|ordering| ordering == Ordering::Equal),
        Literal::Bool(expected) => value.as_bool() == Some(*expected),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number
            .as_i64()
            .map(|n| n != 0)
            .or_else(|| number.as_u64().map(|n| n != 0))
            .unwrap_or_else(|| number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan())),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn numeric_of(value: &Value) -> Option<Number> {
    match value {
        Value::Number(number) => Some(number.clone()),
        Value::String(text) => parse_number(text.trim()),
        _ => None,
    }
}

fn parse_number(text: &str) -> Option<Number> {
    if let Ok(n) = text.parse::<i64>() {
        return Some(Number::from(n));
    }
    if let Ok(n) = text.parse::<u64>() {
        return Some(Number::from(n));
    }
    text.parse::<f64>().ok().and_then(Number::from_f64)
}

fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return Some(x.cmp(&y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

// =============================================================================
// PARSER
// =============================================================================

fn invalid(selector: &str, reason: impl Into<String>) -> ReconError {
    ReconError::InvalidSelector {
        selector: selector.to_string(),
        reason: reason.into(),
    }
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> ReconError {
        invalid(self.input, reason)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), ReconError> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self.error(format!("expected '{expected}', found '{c}'"))),
            None => Err(self.error(format!("expected '{expected}', found end of input"))),
        }
    }

    fn parse_list(&mut self) -> Result<Vec<Compound>, ReconError> {
        let mut alternatives = Vec::new();
        loop {
            self.skip_whitespace();
            alternatives.push(self.parse_compound()?);
            self.skip_whitespace();
            match self.bump() {
                None => return Ok(alternatives),
                Some(',') => continue,
                Some(c) => return Err(self.error(format!("unexpected '{c}'"))),
            }
        }
    }

    fn parse_compound(&mut self) -> Result<Compound, ReconError> {
        let mut compound = Compound::default();
        let mut parts = 0usize;

        loop {
            match self.peek() {
                None | Some(',') => break,
                Some(c) if c.is_whitespace() => {
                    self.skip_whitespace();
                    match self.peek() {
                        None | Some(',') => break,
                        Some(_) => {
                            return Err(self.error("selector combinators are not supported"));
                        }
                    }
                }
                Some('*') => {
                    self.pos += 1;
                }
                Some('#') => {
                    self.pos += 1;
                    let id = self.read_id();
                    if id.is_empty() {
                        return Err(self.error("empty id after '#'"));
                    }
                    compound.conditions.push(Condition::Id(id));
                }
                Some('[') => {
                    self.pos += 1;
                    let condition = self.parse_attribute()?;
                    compound.conditions.push(condition);
                }
                Some(':') => {
                    self.pos += 1;
                    let name = self.read_while(|c| c.is_ascii_alphabetic() || c == '-');
                    let state = State::from_name(&name)
                        .ok_or_else(|| self.error(format!("unknown state ':{name}'")))?;
                    compound.conditions.push(Condition::State(state));
                }
                Some(c) if c.is_ascii_alphabetic() => {
                    let name = self.read_while(|c| c.is_ascii_alphabetic());
                    let group = match name.as_str() {
                        "node" | "nodes" => Group::Node,
                        "edge" | "edges" => Group::Edge,
                        other => return Err(self.error(format!("unknown element group '{other}'"))),
                    };
                    if compound.group.is_some_and(|existing| existing != group) {
                        return Err(self.error("conflicting element groups"));
                    }
                    compound.group = Some(group);
                }
                Some(c) => return Err(self.error(format!("unexpected '{c}'"))),
            }
            parts += 1;
        }

        if parts == 0 {
            return Err(self.error("empty selector"));
        }
        Ok(compound)
    }

    fn read_while(&mut self, accept: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !accept(c) {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }

    fn read_id(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            match c {
                '\\' => {
                    self.pos += 1;
                    if let Some(escaped) = self.bump() {
                        out.push(escaped);
                    }
                }
                '[' | ':' | ',' | '#' => break,
                c if c.is_whitespace() => break,
                c => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
        out
    }

    fn parse_attribute(&mut self) -> Result<Condition, ReconError> {
        self.skip_whitespace();
        let prefix = match self.peek() {
            Some(c @ ('?' | '!' | '^')) => {
                self.pos += 1;
                Some(c)
            }
            _ => None,
        };

        let path = self.read_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if path.is_empty() {
            return Err(self.error("missing attribute name"));
        }
        self.skip_whitespace();

        if self.peek() == Some(']') {
            self.pos += 1;
            let check = match prefix {
                Some('?') => Check::Truthy,
                Some('!') => Check::Falsy,
                Some(_) => Check::Absent,
                None => Check::Present,
            };
            return Ok(Condition::Attribute { path, check });
        }
        if prefix.is_some() {
            return Err(self.error(format!("expected ']' after '{path}'")));
        }

        let case_insensitive = self.peek() == Some('@');
        if case_insensitive {
            self.pos += 1;
        }
        let op = self.parse_operator()?;
        self.skip_whitespace();
        let value = self.parse_literal()?;
        self.skip_whitespace();
        self.expect(']')?;

        if op.is_numeric() && !matches!(value, Literal::Number(_)) {
            return Err(self.error(format!("'{path}' comparison requires a number")));
        }

        Ok(Condition::Attribute {
            path,
            check: Check::Compare {
                op,
                value,
                case_insensitive,
            },
        })
    }

    fn parse_operator(&mut self) -> Result<Operator, ReconError> {
        let first = self
            .bump()
            .ok_or_else(|| self.error("missing operator"))?;
        let second = self.peek();
        let op = match (first, second) {
            ('!', Some('=')) => Operator::Ne,
            ('^', Some('=')) => Operator::StartsWith,
            ('$', Some('=')) => Operator::EndsWith,
            ('*', Some('=')) => Operator::Contains,
            ('<', Some('=')) => Operator::Le,
            ('>', Some('=')) => Operator::Ge,
            ('=', _) => return Ok(Operator::Eq),
            ('<', _) => return Ok(Operator::Lt),
            ('>', _) => return Ok(Operator::Gt),
            (c, _) => return Err(self.error(format!("unknown operator '{c}'"))),
        };
        self.pos += 1;
        Ok(op)
    }

    fn parse_literal(&mut self) -> Result<Literal, ReconError> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.pos += 1;
                let mut out = String::new();
                loop {
                    match self.bump() {
                        None => return Err(self.error("unterminated string")),
                        Some('\\') => {
                            if let Some(escaped) = self.bump() {
                                out.push(escaped);
                            }
                        }
                        Some(c) if c == quote => break,
                        Some(c) => out.push(c),
                    }
                }
                Ok(Literal::Text(out))
            }
            _ => {
                let raw = self.read_while(|c| c != ']');
                let raw = raw.trim();
                if raw.is_empty() {
                    return Err(self.error("missing value"));
                }
                Ok(match raw {
                    "true" => Literal::Bool(true),
                    "false" => Literal::Bool(false),
                    _ => parse_number(raw)
                        .map(Literal::Number)
                        .unwrap_or_else(|| Literal::Text(raw.to_string())),
                })
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeSpec;
    use serde_json::json;

    fn sample_graph() -> Graph {
        let mut graph = Graph::new();
        let domain = NodeSpec::new("domain", "www.example.com")
            .with_id("d1")
            .with_prop("port", 443)
            .with_prop("ssl", true);
        let ip = NodeSpec::new("ipv4", "93.184.216.34")
            .with_id("ip1")
            .with_prop("ssl", false)
            .with_edge("d1");
        let report = graph.upsert_elements(vec![domain, ip]).expect("upsert");
        assert!(report.events.is_empty());
        graph
    }

    fn node_matches(graph: &Graph, selector: &str, id: &str) -> bool {
        let selector = Selector::parse(selector).expect("parse");
        let node = graph.node(id).expect("node");
        selector.matches_node(graph, node)
    }

    #[test]
    fn group_and_wildcard() {
        let graph = sample_graph();
        assert!(node_matches(&graph, "node", "d1"));
        assert!(node_matches(&graph, "*", "d1"));
        assert!(!node_matches(&graph, "edge", "d1"));

        let edge = graph.edges().next().expect("edge");
        assert!(Selector::parse("edge").expect("parse").matches_edge(&graph, edge));
    }

    #[test]
    fn attribute_equality_and_string_ops() {
        let graph = sample_graph();
        assert!(node_matches(&graph, "node[type = \"domain\"]", "d1"));
        assert!(node_matches(&graph, "[type='domain']", "d1"));
        assert!(node_matches(&graph, "[type=domain]", "d1"));
        assert!(!node_matches(&graph, "[type != \"domain\"]", "d1"));
        assert!(node_matches(&graph, "[label ^= \"www.\"]", "d1"));
        assert!(node_matches(&graph, "[label $= \".com\"]", "d1"));
        assert!(node_matches(&graph, "[label *= \"example\"]", "d1"));
        assert!(node_matches(&graph, "[label @^= \"WWW\"]", "d1"));
        assert!(!node_matches(&graph, "[label ^= \"WWW\"]", "d1"));
    }

    #[test]
    fn numeric_and_truthiness_tests() {
        let graph = sample_graph();
        assert!(node_matches(&graph, "[props.port = 443]", "d1"));
        assert!(node_matches(&graph, "[props.port >= 443]", "d1"));
        assert!(!node_matches(&graph, "[props.port < 100]", "d1"));
        assert!(node_matches(&graph, "[?props.ssl]", "d1"));
        assert!(node_matches(&graph, "[!props.ssl]", "ip1"));
        assert!(node_matches(&graph, "[!props.missing]", "ip1"));
        assert!(node_matches(&graph, "[props.port]", "d1"));
        assert!(node_matches(&graph, "[^props.port]", "ip1"));
        assert!(node_matches(&graph, "[props.ssl = true]", "d1"));
        assert!(node_matches(&graph, "[props.port @>= 443]", "d1"));
        assert!(!node_matches(&graph, "[props.port @< 443]", "d1"));
    }

    #[test]
    fn id_and_union() {
        let graph = sample_graph();
        assert!(node_matches(&graph, "#d1", "d1"));
        assert!(!node_matches(&graph, "#d1", "ip1"));
        assert!(node_matches(&graph, "#d1, [type = \"ipv4\"]", "ip1"));
    }

    #[test]
    fn state_selectors() {
        let mut graph = sample_graph();
        let group = graph.ensure_group("Hosts");
        graph.set_parent("ip1", Some(&group)).expect("parent");

        assert!(node_matches(&graph, ":child", "ip1"));
        assert!(node_matches(&graph, ":orphan", "d1"));
        assert!(node_matches(&graph, ":parent", &group));
        assert!(node_matches(&graph, "node:childless", "d1"));
    }

    #[test]
    fn attribute_on_extra_data() {
        let mut graph = Graph::new();
        let mut spec = NodeSpec::new("org", "ACME").with_id("o1");
        spec.data.insert("country".into(), json!("NL"));
        graph.upsert_elements(vec![spec]).expect("upsert");

        assert!(node_matches(&graph, "[country = \"NL\"]", "o1"));
    }

    #[test]
    fn parse_errors_are_reported() {
        for bad in [
            "",
            "node[",
            "[type = \"x\"",
            "node > node",
            "node [type=\"x\"]",
            "widget",
            ":bogus",
            "[props.port > abc]",
            "[= 1]",
            "node,",
        ] {
            let result = Selector::parse(bad);
            assert!(
                matches!(result, Err(ReconError::InvalidSelector { .. })),
                "expected error for {bad:?}"
            );
        }
    }

    #[test]
    fn escaped_id() {
        let mut graph = Graph::new();
        graph
            .upsert_elements(vec![NodeSpec::new("port", "443/TCP").with_id("a:b")])
            .expect("upsert");
        assert!(node_matches(&graph, "#a\\:b", "a:b"));
    }
}
