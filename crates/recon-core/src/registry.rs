//! # Transform Registry
//!
//! Canonical name -> entry mapping with an alias table built at
//! registration time. All keys are lower-cased; lookups ignore case.
//!
//! An entry pairs a static `TransformDescriptor` with a factory closure
//! that builds a fresh job per run.

use crate::primitives::WILDCARD;
use crate::transform::Transform;
use crate::types::ReconError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// DESCRIPTOR
// =============================================================================

/// Declared option of a transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

/// Static metadata of a transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformDescriptor {
    pub name: String,
    pub title: String,
    pub description: String,
    pub alias: Vec<String>,
    /// Label of the group node results are parented under.
    pub group: String,
    pub tags: Vec<String>,
    /// Node types the transform accepts.
    pub types: Vec<String>,
    /// Lower runs first.
    pub priority: i32,
    /// Expected output volume; wildcard filters drop noisy transforms.
    pub noise: u32,
    pub options: BTreeMap<String, OptionSpec>,
}

impl TransformDescriptor {
    /// Descriptor with the group label defaulting to the title.
    #[must_use]
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            name: name.into(),
            group: title.clone(),
            title,
            description: String::new(),
            alias: Vec::new(),
            tags: Vec::new(),
            types: Vec::new(),
            priority: 0,
            noise: 0,
            options: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn alias<I, S>(mut self, alias: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alias = alias.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn noise(mut self, noise: u32) -> Self {
        self.noise = noise;
        self
    }

    #[must_use]
    pub fn option(
        mut self,
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.options.insert(
            name.into(),
            OptionSpec {
                kind: kind.into(),
                description: description.into(),
            },
        );
        self
    }

    #[must_use]
    pub fn accepts_type(&self, node_type: &str) -> bool {
        self.types.iter().any(|t| t == node_type)
    }

    /// Check whether any declared type is among `tags`.
    #[must_use]
    pub fn accepts_any(&self, tags: &BTreeSet<String>) -> bool {
        self.types.iter().any(|t| tags.contains(t))
    }
}

// =============================================================================
// ENTRY
// =============================================================================

/// Builds a fresh job instance.
pub type TransformFactory = Arc<dyn Fn() -> Box<dyn Transform> + Send + Sync>;

/// A registered transform.
#[derive(Clone)]
pub struct TransformEntry {
    descriptor: TransformDescriptor,
    factory: TransformFactory,
}

impl fmt::Debug for TransformEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformEntry")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl TransformEntry {
    pub fn new<F>(descriptor: TransformDescriptor, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Transform> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            factory: Arc::new(factory),
        }
    }

    /// Entry whose jobs are `T::default()`.
    pub fn of<T>(descriptor: TransformDescriptor) -> Self
    where
        T: Transform + Default + 'static,
    {
        Self::new(descriptor, || Box::new(T::default()) as Box<dyn Transform>)
    }

    #[must_use]
    pub fn descriptor(&self) -> &TransformDescriptor {
        &self.descriptor
    }

    /// Construct a job for one run.
    #[must_use]
    pub fn build(&self) -> Box<dyn Transform> {
        (self.factory)()
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    entries: BTreeMap<String, TransformEntry>,
    aliases: BTreeMap<String, String>,
}

impl TransformRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry under its name and every alias. A later
    /// registration with the same name replaces the earlier one.
    pub fn register(&mut self, entry: TransformEntry) {
        let canonical = entry.descriptor.name.to_lowercase();
        if self.entries.remove(&canonical).is_some() {
            self.aliases.retain(|_, target| *target != canonical);
        }
        self.aliases.insert(canonical.clone(), canonical.clone());
        for alias in &entry.descriptor.alias {
            self.aliases.insert(alias.to_lowercase(), canonical.clone());
        }
        self.entries.insert(canonical, entry);
    }

    pub fn register_all(&mut self, entries: impl IntoIterator<Item = TransformEntry>) {
        for entry in entries {
            self.register(entry);
        }
    }

    /// Look up a transform by name or alias, ignoring case.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&TransformEntry> {
        let canonical = self.aliases.get(&name.to_lowercase())?;
        self.entries.get(canonical)
    }

    /// Resolve a transform request: the wildcard yields every entry,
    /// anything else exactly one.
    pub fn candidates(&self, name: &str) -> Result<Vec<&TransformEntry>, ReconError> {
        if name == WILDCARD {
            return Ok(self.entries.values().collect());
        }
        self.resolve(name)
            .map(|entry| vec![entry])
            .ok_or_else(|| ReconError::UnknownTransform(name.to_lowercase()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &TransformEntry> {
        self.entries.values()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &TransformDescriptor> {
        self.entries.values().map(TransformEntry::descriptor)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{TransformContext, TransformError, TransformOptions};
    use crate::types::{Node, NodeSpec};
    use async_trait::async_trait;

    #[derive(Default)]
    struct Noop;

    #[async_trait]
    impl Transform for Noop {
        async fn handle(
            &self,
            _node: &Node,
            _options: &TransformOptions,
            _ctx: &TransformContext,
        ) -> Result<Vec<NodeSpec>, TransformError> {
            Ok(Vec::new())
        }
    }

    fn entry(name: &str, alias: &[&str]) -> TransformEntry {
        TransformEntry::of::<Noop>(
            TransformDescriptor::new(name, name.to_uppercase()).alias(alias.iter().copied()),
        )
    }

    #[test]
    fn resolves_name_and_aliases_case_insensitively() {
        let mut registry = TransformRegistry::new();
        registry.register_all([entry("Shodan_Org_Search", &["SOS"]), entry("other", &[])]);

        assert_eq!(registry.len(), 2);
        for name in ["shodan_org_search", "SHODAN_ORG_SEARCH", "sos", "Sos"] {
            let found = registry.resolve(name).expect("resolve");
            assert_eq!(found.descriptor().name, "Shodan_Org_Search");
        }
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn reregistration_drops_stale_aliases() {
        let mut registry = TransformRegistry::new();
        registry.register(entry("job", &["old"]));
        registry.register(entry("job", &["new"]));

        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("old").is_none());
        assert!(registry.resolve("new").is_some());
    }

    #[test]
    fn candidates_for_wildcard_and_unknown() {
        let mut registry = TransformRegistry::new();
        registry.register_all([entry("a", &[]), entry("b", &[])]);

        assert_eq!(registry.candidates("*").expect("all").len(), 2);
        assert_eq!(registry.candidates("A").expect("one").len(), 1);
        let err = registry.candidates("Nope").expect_err("unknown");
        assert_eq!(err.to_string(), "Unknown transform nope");
    }

    #[test]
    fn descriptor_defaults_group_to_title() {
        let descriptor = TransformDescriptor::new("x", "Title X").types(["domain"]);
        assert_eq!(descriptor.group, "Title X");
        assert!(descriptor.accepts_type("domain"));
        assert!(!descriptor.accepts_type("org"));
    }

    #[test]
    fn entry_builds_fresh_jobs() {
        let entry = entry("a", &[]);
        let _first = entry.build();
        let _second = entry.build();
        assert_eq!(entry.descriptor().title, "A");
    }
}
