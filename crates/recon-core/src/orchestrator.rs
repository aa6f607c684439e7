//! # Transform Orchestrator
//!
//! Resolves which transforms run on which nodes, runs them concurrently,
//! applies limits and merges the results into the session.
//!
//! ## Pipeline
//!
//! 1. Resolve candidates (one named entry, or every entry for `*`)
//! 2. Snapshot the working set's nodes as the input pool
//! 3. Wildcard only: keep transforms whose `types` meet the inferred input
//!    tags, then apply the optional noise and pattern filter
//! 4. Optional extraction rewrites every input label
//! 5. Order by ascending `priority` and run every job concurrently
//! 6. Per job: group, warn, cap
//! 7. Merge the concatenated output; it becomes the working set
//! 8. Optionally re-measure the previous working set
//!
//! A failing job contributes nothing and never affects its siblings.

use crate::config::EngineConfig;
use crate::detect::infer_tags;
use crate::events::{Event, EventSink};
use crate::identity::derive_group_id;
use crate::primitives::WILDCARD;
use crate::registry::{TransformDescriptor, TransformEntry, TransformRegistry};
use crate::session::Session;
use crate::transform::{Progress, TransformContext, TransformOptions};
use crate::types::{Attributes, Node, NodeSpec, ReconError, Selection, kind};
use futures_util::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::time::{Instant, interval_at};

// =============================================================================
// SETTINGS
// =============================================================================

/// Wildcard-mode filter over transform metadata.
///
/// A transform passes when its noise is within the threshold and, if any
/// pattern is set, at least one pattern matches.
#[derive(Debug, Clone, Default)]
pub struct TransformFilter {
    /// Maximum accepted noise; `None` uses the configured default.
    pub noise: Option<u32>,
    pub name: Option<Regex>,
    pub alias: Option<Regex>,
    pub title: Option<Regex>,
    pub tag: Option<Regex>,
}

fn compile(pattern: &str) -> Result<Regex, ReconError> {
    Regex::new(pattern).map_err(|e| ReconError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

impl TransformFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_noise(mut self, noise: u32) -> Self {
        self.noise = Some(noise);
        self
    }

    pub fn with_name(mut self, pattern: &str) -> Result<Self, ReconError> {
        self.name = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_alias(mut self, pattern: &str) -> Result<Self, ReconError> {
        self.alias = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_title(mut self, pattern: &str) -> Result<Self, ReconError> {
        self.title = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_tag(mut self, pattern: &str) -> Result<Self, ReconError> {
        self.tag = Some(compile(pattern)?);
        Ok(self)
    }

    fn admits(&self, descriptor: &TransformDescriptor, default_noise: u32) -> bool {
        if descriptor.noise > self.noise.unwrap_or(default_noise) {
            return false;
        }
        let patterns = [&self.name, &self.alias, &self.title, &self.tag];
        if patterns.iter().all(|pattern| pattern.is_none()) {
            return true;
        }

        let any = |pattern: &Option<Regex>, values: &[String]| {
            pattern
                .as_ref()
                .is_some_and(|re| values.iter().any(|value| re.is_match(value)))
        };
        any(&self.name, std::slice::from_ref(&descriptor.name))
            || any(&self.alias, &descriptor.alias)
            || any(&self.title, std::slice::from_ref(&descriptor.title))
            || any(&self.tag, &descriptor.tags)
    }
}

/// Rewrites each input label to `prefix + props.<property> + suffix`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Dotted path inside `props`.
    pub property: String,
    pub prefix: String,
    pub suffix: String,
}

impl Extraction {
    #[must_use]
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            ..Self::default()
        }
    }

    /// Missing paths yield an empty value. An empty property leaves the
    /// labels alone.
    fn apply(&self, nodes: &mut [Node]) {
        if self.property.is_empty() {
            return;
        }
        let path = format!("props.{}", self.property);
        for node in nodes {
            let value = match node.attribute(&path) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(text)) => text,
                Some(other) => other.to_string(),
            };
            node.label = format!("{}{value}{}", self.prefix, self.suffix);
        }
    }
}

/// Per-call behaviour of `Orchestrator::transform`.
#[derive(Debug, Clone, Default)]
pub struct TransformSettings {
    /// Parent each job's results under a group node.
    pub group: bool,
    /// Re-measure the pre-transform working set afterwards.
    pub weight: bool,
    pub filter: Option<TransformFilter>,
    pub extract: Option<Extraction>,
    /// Overrides `EngineConfig::max_nodes_warn`; zero keeps the configured value.
    pub max_nodes_warn: Option<usize>,
    /// Overrides `EngineConfig::max_nodes_cap`; zero keeps the configured value.
    pub max_nodes_cap: Option<usize>,
}

fn per_call_limit(requested: Option<usize>, configured: usize) -> usize {
    requested.filter(|limit| *limit > 0).unwrap_or(configured)
}

// =============================================================================
// REPORTS
// =============================================================================

/// Outcome of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub name: String,
    pub title: String,
    /// Number of input nodes handed to the job.
    pub input: usize,
    /// Number of specs contributed after grouping and capping.
    pub output: usize,
    pub warned: bool,
    pub capped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one `transform` call.
#[derive(Debug, Clone, Default)]
pub struct TransformReport {
    /// Concatenated output of every job, as merged.
    pub output: Vec<NodeSpec>,
    /// Nodes created or merged; the new working set.
    pub nodes: Selection,
    /// One report per job, in execution order.
    pub jobs: Vec<JobReport>,
    /// Every event raised during the call.
    pub events: Vec<Event>,
}

/// Forwards events and keeps a copy for the report.
struct Recorder {
    forward: Arc<dyn EventSink>,
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn new(forward: Arc<dyn EventSink>) -> Self {
        Self {
            forward,
            events: Mutex::new(Vec::new()),
        }
    }

    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl EventSink for Recorder {
    fn emit(&self, event: &Event) {
        self.forward.emit(event);
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Limits applied to every job of one call.
#[derive(Debug, Clone, Copy)]
struct Limits {
    group: bool,
    warn: usize,
    cap: usize,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<TransformRegistry>,
    config: EngineConfig,
}

impl Orchestrator {
    #[must_use]
    pub fn new(registry: Arc<TransformRegistry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    #[must_use]
    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `name` (or every applicable transform for `*`) over the working
    /// set and merge the results.
    ///
    /// Fails before any job is built when the name is not registered.
    pub async fn transform(
        &self,
        session: &mut Session,
        name: &str,
        options: &TransformOptions,
        settings: &TransformSettings,
    ) -> Result<TransformReport, ReconError> {
        let mut jobs = self.registry.candidates(name)?;
        let wildcard = name == WILDCARD;
        let recorder = Arc::new(Recorder::new(session.sink()));
        let mut pool = session.selected_nodes();

        if wildcard {
            let tags: BTreeSet<String> = pool.iter().flat_map(infer_tags).collect();
            jobs.retain(|entry| entry.descriptor().accepts_any(&tags));
            if let Some(filter) = &settings.filter {
                jobs.retain(|entry| filter.admits(entry.descriptor(), self.config.default_noise));
            }
        }

        if let Some(extract) = &settings.extract {
            extract.apply(&mut pool);
        }

        jobs.sort_by_key(|entry| entry.descriptor().priority);

        let limits = Limits {
            group: settings.group,
            warn: per_call_limit(settings.max_nodes_warn, self.config.max_nodes_warn),
            cap: per_call_limit(settings.max_nodes_cap, self.config.max_nodes_cap),
        };

        let runs = jobs.iter().map(|entry| {
            let input: Vec<Node> = if wildcard {
                pool.iter()
                    .filter(|node| entry.descriptor().accepts_type(&node.node_type))
                    .cloned()
                    .collect()
            } else {
                pool.clone()
            };
            self.run_job(entry, input, options, limits, Arc::clone(&recorder))
        });
        let outcomes = join_all(runs).await;

        let mut output = Vec::new();
        let mut reports = Vec::with_capacity(outcomes.len());
        for (specs, report) in outcomes {
            output.extend(specs);
            reports.push(report);
        }

        recorder.emit(&Event::info(format!(
            "Attempting to add {} elements",
            output.len()
        )));

        let previous = session.selection().clone();
        let upsert = session.upsert(output.clone())?;
        if settings.weight {
            session.measure(Some(&previous));
        }

        let mut events = recorder.take();
        events.extend(upsert.events);

        Ok(TransformReport {
            output,
            nodes: upsert.nodes,
            jobs: reports,
            events,
        })
    }

    async fn run_job(
        &self,
        entry: &TransformEntry,
        input: Vec<Node>,
        options: &TransformOptions,
        limits: Limits,
        sink: Arc<Recorder>,
    ) -> (Vec<NodeSpec>, JobReport) {
        let descriptor = entry.descriptor();
        let quoted = serde_json::to_string(&descriptor.title)
            .unwrap_or_else(|_| format!("\"{}\"", descriptor.title));
        let mut report = JobReport {
            name: descriptor.name.clone(),
            title: descriptor.title.clone(),
            input: input.len(),
            output: 0,
            warned: false,
            capped: false,
            error: None,
        };

        sink.emit(&Event::info(format!(
            "Starting transform {quoted} on {} nodes...",
            input.len()
        )));

        let job = entry.build();
        let (ctx, progress) = TransformContext::new(descriptor.title.clone(), sink.clone());
        let period = self.config.progress_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        let mut run = job.run(input, options, &ctx);

        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                _ = ticker.tick() => {
                    let Progress { step, total } = *progress.borrow();
                    sink.emit(&Event::info(format!(
                        "Transform {quoted} still running {step}/{total}..."
                    )));
                }
            }
        };
        drop(progress);

        let mut results = match outcome {
            Ok(results) => results,
            Err(e) => {
                sink.emit(&Event::warn(format!("Transform {quoted} failed")));
                sink.emit(&Event::error(format!("{}: {e}", descriptor.title)).with_source(&descriptor.title));
                report.error = Some(e.to_string());
                Vec::new()
            }
        };

        sink.emit(&Event::info(format!(
            "Transform {quoted} finished with {} results",
            results.len()
        )));

        if limits.group && !results.is_empty() {
            let group_id = derive_group_id(&descriptor.group);
            for result in &mut results {
                result.parent = Some(group_id.clone());
            }
            results.insert(0, group_spec(group_id, descriptor));
        }

        if limits.warn > 0 && results.len() > limits.warn {
            sink.emit(&Event::warn(format!(
                "Transform {quoted} will add {} nodes",
                results.len()
            )));
            report.warned = true;
        }

        if limits.cap > 0 && results.len() > limits.cap {
            sink.emit(&Event::warn(format!(
                "Transform {quoted} nodes capped to {}",
                limits.cap
            )));
            results.truncate(limits.cap);
            report.capped = true;
        }

        report.output = results.len();
        (results, report)
    }
}

/// The group node a job's results are parented under.
fn group_spec(id: String, descriptor: &TransformDescriptor) -> NodeSpec {
    let mut props = Attributes::new();
    props.insert("group".into(), Value::from(descriptor.group.clone()));
    props.insert("title".into(), Value::from(descriptor.title.clone()));
    props.insert("description".into(), Value::from(descriptor.description.clone()));
    NodeSpec {
        id: Some(id),
        node_type: Some(kind::GROUP.to_string()),
        label: Some(descriptor.group.clone()),
        props: Some(props),
        ..NodeSpec::default()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollectingSink, EventLevel};
    use crate::transform::{Transform, TransformError};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Sleepy {
        delay: Duration,
    }

    #[async_trait]
    impl Transform for Sleepy {
        async fn handle(
            &self,
            node: &Node,
            _options: &TransformOptions,
            _ctx: &TransformContext,
        ) -> Result<Vec<NodeSpec>, TransformError> {
            tokio::time::sleep(self.delay).await;
            Ok(vec![NodeSpec::new("nick", format!("{}-seen", node.label))])
        }
    }

    #[derive(Default)]
    struct Broken;

    #[async_trait]
    impl Transform for Broken {
        async fn handle(
            &self,
            _node: &Node,
            _options: &TransformOptions,
            _ctx: &TransformContext,
        ) -> Result<Vec<NodeSpec>, TransformError> {
            Err(TransformError::MissingOption("apiKey".into()))
        }
    }

    struct Fanout {
        count: usize,
    }

    #[async_trait]
    impl Transform for Fanout {
        async fn handle(
            &self,
            _node: &Node,
            _options: &TransformOptions,
            _ctx: &TransformContext,
        ) -> Result<Vec<NodeSpec>, TransformError> {
            Ok((0..self.count)
                .map(|i| NodeSpec::new("domain", format!("host{i}.example.com")))
                .collect())
        }
    }

    fn session_with(sink: Arc<CollectingSink>) -> Session {
        let mut session = Session::with_sink(sink);
        session
            .upsert(vec![NodeSpec::new("org", "ACME")])
            .expect("upsert");
        session
    }

    #[test]
    fn filter_noise_and_patterns() {
        let quiet = TransformDescriptor::new("quiet_lookup", "Quiet")
            .noise(5)
            .tags(["passive"]);
        let loud = TransformDescriptor::new("loud_scan", "Loud").noise(50);

        let default = TransformFilter::new();
        assert!(default.admits(&quiet, 10));
        assert!(!default.admits(&loud, 10));
        assert!(TransformFilter::new().with_noise(100).admits(&loud, 10));

        let by_tag = TransformFilter::new().with_tag("^pass").expect("regex");
        assert!(by_tag.admits(&quiet, 10));
        let by_name = TransformFilter::new().with_name("^scan").expect("regex");
        assert!(!by_name.admits(&quiet, 10));

        assert!(matches!(
            TransformFilter::new().with_title("("),
            Err(ReconError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn extraction_rewrites_labels() {
        let mut node = Node::new("n", "domain", "old");
        node.props
            .insert("dns".into(), serde_json::json!({"host": "mail.example.com"}));
        let mut nodes = vec![node, Node::new("m", "domain", "other")];

        let extraction = Extraction {
            property: "dns.host".into(),
            prefix: "https://".into(),
            suffix: "/".into(),
        };
        extraction.apply(&mut nodes);

        assert_eq!(nodes[0].label, "https://mail.example.com/");
        assert_eq!(nodes[1].label, "https:///");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_job_reports_still_running() {
        let sink = Arc::new(CollectingSink::new());
        let mut session = session_with(sink.clone());
        let mut registry = TransformRegistry::new();
        registry.register(TransformEntry::new(
            TransformDescriptor::new("sleepy", "Sleepy").types(["org"]),
            || {
                Box::new(Sleepy {
                    delay: Duration::from_secs(25),
                }) as Box<dyn Transform>
            },
        ));
        let orchestrator = Orchestrator::new(Arc::new(registry), EngineConfig::default());

        let report = orchestrator
            .transform(
                &mut session,
                "sleepy",
                &TransformOptions::new(),
                &TransformSettings::default(),
            )
            .await
            .expect("transform");

        let notices = report
            .events
            .iter()
            .filter(|event| event.message.contains("still running"))
            .count();
        assert_eq!(notices, 2);
        assert_eq!(report.output.len(), 1);
        assert!(report.events[0].message.starts_with("Starting transform \"Sleepy\" on 1 nodes"));
    }

    #[tokio::test]
    async fn failing_job_yields_warning_and_error() {
        let sink = Arc::new(CollectingSink::new());
        let mut session = session_with(sink.clone());
        let before = session.graph().node_count();
        let mut registry = TransformRegistry::new();
        registry.register(TransformEntry::of::<Broken>(
            TransformDescriptor::new("broken", "Broken").types(["org"]),
        ));
        let orchestrator = Orchestrator::new(Arc::new(registry), EngineConfig::default());

        let report = orchestrator
            .transform(
                &mut session,
                "broken",
                &TransformOptions::new(),
                &TransformSettings::default(),
            )
            .await
            .expect("transform");

        assert!(report.output.is_empty());
        assert_eq!(report.jobs[0].error.as_deref(), Some("missing option apiKey"));
        assert_eq!(sink.count(EventLevel::Warn), 1);
        assert_eq!(sink.count(EventLevel::Error), 1);
        assert_eq!(session.graph().node_count(), before);
        assert!(session.selection().is_empty());
    }

    #[tokio::test]
    async fn unknown_name_fails_before_running() {
        let sink = Arc::new(CollectingSink::new());
        let mut session = session_with(sink.clone());
        let orchestrator =
            Orchestrator::new(Arc::new(TransformRegistry::new()), EngineConfig::default());

        let result = orchestrator
            .transform(
                &mut session,
                "Ghost",
                &TransformOptions::new(),
                &TransformSettings::default(),
            )
            .await;

        assert!(matches!(result, Err(ReconError::UnknownTransform(ref n)) if n == "ghost"));
        assert!(sink.events().is_empty());
        assert_eq!(session.selection().len(), 1);
    }

    #[tokio::test]
    async fn zero_per_call_cap_keeps_configured_cap() {
        let sink = Arc::new(CollectingSink::new());
        let mut session = session_with(sink.clone());
        let mut registry = TransformRegistry::new();
        registry.register(TransformEntry::new(
            TransformDescriptor::new("fanout", "Fanout").types(["org"]),
            || Box::new(Fanout { count: 5 }) as Box<dyn Transform>,
        ));
        let config = EngineConfig {
            max_nodes_cap: 2,
            ..EngineConfig::default()
        };
        let orchestrator = Orchestrator::new(Arc::new(registry), config);
        let settings = TransformSettings {
            max_nodes_cap: Some(0),
            ..TransformSettings::default()
        };

        let report = orchestrator
            .transform(&mut session, "fanout", &TransformOptions::new(), &settings)
            .await
            .expect("transform");

        assert_eq!(report.output.len(), 2);
        assert!(report.jobs[0].capped);
    }

    #[test]
    fn per_call_limit_overrides_when_positive() {
        assert_eq!(per_call_limit(Some(3), 10), 3);
        assert_eq!(per_call_limit(Some(0), 10), 10);
        assert_eq!(per_call_limit(None, 10), 10);
        assert_eq!(per_call_limit(None, 0), 0);
    }
}
