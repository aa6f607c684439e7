//! # Engine Scenario Tests (T0-T3)
//!
//! ## Tiers
//! - T0: Identity & Merge
//! - T1: Selection & Traversal
//! - T2: Transform Orchestration
//! - T3: Persistence

use async_trait::async_trait;
use recon_core::{
    CollectingSink, EngineConfig, EventLevel, Extraction, Node, NodeSpec, Orchestrator,
    ReconError, Session, Transform, TransformContext, TransformDescriptor, TransformEntry,
    TransformError, TransformFilter, TransformOptions, TransformRegistry, TransformSettings,
    derive_group_id, derive_node_id,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// =============================================================================
// FIXTURES
// =============================================================================

/// Returns a fixed set of specs per input node, templated on the node id.
struct Fixed {
    make: fn(&Node) -> Vec<NodeSpec>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Transform for Fixed {
    async fn handle(
        &self,
        node: &Node,
        _options: &TransformOptions,
        _ctx: &TransformContext,
    ) -> Result<Vec<NodeSpec>, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.make)(node))
    }
}

fn fixed_entry(
    descriptor: TransformDescriptor,
    make: fn(&Node) -> Vec<NodeSpec>,
) -> (TransformEntry, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let entry = TransformEntry::new(descriptor, move || {
        Box::new(Fixed {
            make,
            calls: Arc::clone(&counter),
        }) as Box<dyn Transform>
    });
    (entry, calls)
}

fn resolve_ip(node: &Node) -> Vec<NodeSpec> {
    vec![NodeSpec::new("ipv4", "93.184.216.34").with_edge(node.id.clone())]
}

fn many_ports(node: &Node) -> Vec<NodeSpec> {
    (0..5)
        .map(|i| NodeSpec::new("port", format!("{}/TCP", 8000 + i)).with_edge(node.id.clone()))
        .collect()
}

fn echo_label(node: &Node) -> Vec<NodeSpec> {
    vec![NodeSpec::new("nick", node.label.clone())]
}

fn orchestrator(entries: Vec<TransformEntry>) -> Orchestrator {
    let mut registry = TransformRegistry::new();
    registry.register_all(entries);
    Orchestrator::new(Arc::new(registry), EngineConfig::default())
}

fn domain_session() -> (Session, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let mut session = Session::with_sink(sink.clone());
    session
        .upsert(vec![NodeSpec::new("domain", "example.com")])
        .expect("upsert");
    (session, sink)
}

// =============================================================================
// TIER T0: IDENTITY & MERGE
// =============================================================================

mod t0_identity_and_merge {
    use super::*;

    /// T0.1: A spec without id lands on the derived id.
    #[test]
    fn derived_id_on_create() {
        let (session, _) = domain_session();
        let id = derive_node_id("domain", "example.com");
        assert_eq!(session.graph().node_count(), 1);
        assert!(session.graph().contains_node(&id));
        assert_eq!(session.selection().node_ids().collect::<Vec<_>>(), vec![id.as_str()]);
    }

    /// T0.2: Re-adding merges instead of duplicating.
    #[test]
    fn readd_merges() {
        let (mut session, _) = domain_session();
        session
            .upsert(vec![NodeSpec::new("domain", "example.com").with_prop("seen", true)])
            .expect("upsert");
        assert_eq!(session.graph().node_count(), 1);
    }

    /// T0.3: Malformed specs are skipped, the rest of the batch lands.
    #[test]
    fn malformed_spec_is_isolated() {
        let (mut session, sink) = domain_session();
        let report = session
            .upsert(vec![
                NodeSpec::default(),
                NodeSpec::new("org", "ACME"),
                NodeSpec::new("ipv4", "1.1.1.1").with_edge("missing-node"),
            ])
            .expect("upsert");

        assert_eq!(report.nodes.len(), 2);
        assert_eq!(report.error_count(), 2);
        assert_eq!(sink.count(EventLevel::Error), 2);
        assert_eq!(session.graph().edge_count(), 0);
    }
}

// =============================================================================
// TIER T1: SELECTION & TRAVERSAL
// =============================================================================

mod t1_selection_and_traversal {
    use super::*;

    fn seeded() -> Session {
        let mut session = Session::new();
        session
            .upsert(vec![
                NodeSpec::new("domain", "example.com").with_id("d"),
                NodeSpec::new("ipv4", "10.0.0.1").with_id("i").with_edge("d"),
                NodeSpec::new("port", "443/TCP").with_id("p").with_edge("i"),
            ])
            .expect("upsert");
        session
    }

    /// T1.1: Empty expression list yields an empty working set.
    #[test]
    fn empty_select_clears() {
        let mut session = seeded();
        assert!(session.select::<&str>(&[]).expect("select").is_empty());
    }

    /// T1.2: Traversal starts from the whole graph.
    #[test]
    fn traversal_from_whole_graph() {
        let mut session = seeded();
        session.select(&["#p"]).expect("select");
        let selected = session.traverse(&["nodes | roots"]).expect("traverse");
        assert_eq!(selected.node_ids().collect::<Vec<_>>(), vec!["d"]);
    }

    /// T1.3: Unknown traversal function leaves the store unmodified.
    #[test]
    fn unknown_traversal_leaves_store() {
        let mut session = seeded();
        let before = session.serialize();
        let err = session.traverse(&["nodes | teleport"]).expect_err("must fail");

        assert!(matches!(err, ReconError::UnknownTraversal(_)));
        assert_eq!(session.serialize(), before);
    }

    /// T1.4: Successors walk the whole chain.
    #[test]
    fn successors_of_domain() {
        let mut session = seeded();
        let selected = session
            .traverse(&["filter [type = \"domain\"]", "successors node"])
            .expect("traverse");
        assert_eq!(selected.node_ids().collect::<Vec<_>>(), vec!["i", "p"]);
    }
}

// =============================================================================
// TIER T2: TRANSFORM ORCHESTRATION
// =============================================================================

mod t2_orchestration {
    use super::*;

    fn resolver() -> (TransformEntry, Arc<AtomicUsize>) {
        fixed_entry(
            TransformDescriptor::new("resolve", "Resolve")
                .types(["domain"])
                .noise(1),
            resolve_ip,
        )
    }

    /// T2.1: End-to-end named transform.
    #[tokio::test]
    async fn named_transform_end_to_end() {
        let (mut session, _) = domain_session();
        let (entry, _) = resolver();
        let engine = orchestrator(vec![entry]);
        let domain_id = derive_node_id("domain", "example.com");
        let ip_id = derive_node_id("ipv4", "93.184.216.34");

        let report = engine
            .transform(&mut session, "resolve", &TransformOptions::new(), &TransformSettings::default())
            .await
            .expect("transform");

        assert_eq!(report.output.len(), 1);
        assert_eq!(session.graph().node_count(), 2);
        assert_eq!(session.graph().edge_count(), 1);
        let edge = session.graph().edges().next().expect("edge");
        assert_eq!(edge.source, domain_id);
        assert_eq!(edge.target, ip_id);
        assert_eq!(session.selection().node_ids().collect::<Vec<_>>(), vec![ip_id.as_str()]);
    }

    /// T2.2: Re-running the identical transform produces no duplicates.
    #[tokio::test]
    async fn rerun_is_idempotent() {
        let (mut session, _) = domain_session();
        let (entry, _) = resolver();
        let engine = orchestrator(vec![entry]);

        for _ in 0..2 {
            session.select(&["[type = \"domain\"]"]).expect("select");
            engine
                .transform(&mut session, "RESOLVE", &TransformOptions::new(), &TransformSettings::default())
                .await
                .expect("transform");
        }

        assert_eq!(session.graph().node_count(), 2);
        assert_eq!(session.graph().edge_count(), 1);
    }

    /// T2.3: Wildcard never runs a domain transform on org-only input.
    #[tokio::test]
    async fn wildcard_respects_types() {
        let mut session = Session::new();
        session.upsert(vec![NodeSpec::new("org", "ACME")]).expect("upsert");
        let (domain_job, domain_calls) = resolver();
        let (org_job, org_calls) = fixed_entry(
            TransformDescriptor::new("org_echo", "Org Echo").types(["org"]),
            echo_label,
        );
        let engine = orchestrator(vec![domain_job, org_job]);

        let report = engine
            .transform(&mut session, "*", &TransformOptions::new(), &TransformSettings::default())
            .await
            .expect("transform");

        assert_eq!(domain_calls.load(Ordering::SeqCst), 0);
        assert_eq!(org_calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.jobs.len(), 1);
        assert_eq!(report.jobs[0].name, "org_echo");
    }

    /// T2.4: Wildcard tags include detected label types; each job only sees
    /// nodes of its own types.
    #[tokio::test]
    async fn wildcard_detects_label_types() {
        let mut session = Session::new();
        session
            .upsert(vec![NodeSpec::new("brand", "example.com"), NodeSpec::new("org", "ACME")])
            .expect("upsert");
        let (domain_job, domain_calls) = resolver();
        let (brand_job, brand_calls) = fixed_entry(
            TransformDescriptor::new("brand_echo", "Brand Echo").types(["brand"]),
            echo_label,
        );
        let engine = orchestrator(vec![domain_job, brand_job]);

        engine
            .transform(&mut session, "*", &TransformOptions::new(), &TransformSettings::default())
            .await
            .expect("transform");

        // The domain job is selected by the detected tag but has no node of
        // type "domain" to work on.
        assert_eq!(domain_calls.load(Ordering::SeqCst), 0);
        assert_eq!(brand_calls.load(Ordering::SeqCst), 1);
    }

    /// T2.5: Noise filter drops loud transforms in wildcard mode.
    #[tokio::test]
    async fn noise_filter() {
        let (mut session, _) = domain_session();
        let (quiet, quiet_calls) = resolver();
        let (loud, loud_calls) = fixed_entry(
            TransformDescriptor::new("loud", "Loud").types(["domain"]).noise(50),
            many_ports,
        );
        let engine = orchestrator(vec![quiet, loud]);
        let settings = TransformSettings {
            filter: Some(TransformFilter::new()),
            ..TransformSettings::default()
        };

        engine
            .transform(&mut session, "*", &TransformOptions::new(), &settings)
            .await
            .expect("transform");

        assert_eq!(quiet_calls.load(Ordering::SeqCst), 1);
        assert_eq!(loud_calls.load(Ordering::SeqCst), 0);
    }

    /// T2.6: The cap truncates to exactly the cap and warns.
    #[tokio::test]
    async fn cap_truncates() {
        let (mut session, sink) = domain_session();
        let (ports, _) = fixed_entry(
            TransformDescriptor::new("ports", "Ports").types(["domain"]),
            many_ports,
        );
        let engine = orchestrator(vec![ports]);
        let settings = TransformSettings {
            max_nodes_cap: Some(3),
            ..TransformSettings::default()
        };

        let report = engine
            .transform(&mut session, "ports", &TransformOptions::new(), &settings)
            .await
            .expect("transform");

        assert_eq!(report.output.len(), 3);
        assert!(report.jobs[0].capped);
        assert_eq!(session.selection().len(), 3);
        assert_eq!(sink.count(EventLevel::Warn), 1);
    }

    /// T2.7: A warn threshold below the cap warns without truncating.
    #[tokio::test]
    async fn warn_does_not_truncate() {
        let (mut session, sink) = domain_session();
        let (ports, _) = fixed_entry(
            TransformDescriptor::new("ports", "Ports").types(["domain"]),
            many_ports,
        );
        let engine = orchestrator(vec![ports]);
        let settings = TransformSettings {
            max_nodes_warn: Some(2),
            max_nodes_cap: Some(10),
            ..TransformSettings::default()
        };

        let report = engine
            .transform(&mut session, "ports", &TransformOptions::new(), &settings)
            .await
            .expect("transform");

        assert_eq!(report.output.len(), 5);
        assert!(report.jobs[0].warned);
        assert!(!report.jobs[0].capped);
        assert_eq!(sink.count(EventLevel::Warn), 1);
    }

    /// T2.8: Grouping parents each job's results under its own group.
    #[tokio::test]
    async fn grouping_per_job() {
        let (mut session, _) = domain_session();
        let (resolve, _) = resolver();
        let (ports, _) = fixed_entry(
            TransformDescriptor::new("ports", "Ports")
                .types(["domain"])
                .group("Port Scan")
                .priority(-1),
            many_ports,
        );
        let engine = orchestrator(vec![resolve, ports]);
        let settings = TransformSettings {
            group: true,
            ..TransformSettings::default()
        };

        let report = engine
            .transform(&mut session, "*", &TransformOptions::new(), &settings)
            .await
            .expect("transform");

        let scan_group = derive_group_id("Port Scan");
        let resolve_group = derive_group_id("Resolve");
        assert_eq!(report.jobs[0].name, "ports");
        assert_eq!(report.output.len(), 8);

        let graph = session.graph();
        assert_eq!(graph.children_of(&scan_group).count(), 5);
        assert_eq!(graph.children_of(&resolve_group).count(), 1);
        let group_node = graph.node(&scan_group).expect("group node");
        assert_eq!(group_node.node_type, "group");
        assert_eq!(group_node.parent, None);
        assert_eq!(group_node.props.get("title").and_then(|v| v.as_str()), Some("Ports"));
        let groups = report
            .output
            .iter()
            .filter(|spec| spec.node_type.as_deref() == Some("group"))
            .count();
        assert_eq!(groups, 2);
    }

    /// T2.9: Weighting re-measures the pre-transform working set.
    #[tokio::test]
    async fn weight_measures_previous_selection() {
        let (mut session, _) = domain_session();
        let (ports, _) = fixed_entry(
            TransformDescriptor::new("ports", "Ports").types(["domain"]),
            many_ports,
        );
        let engine = orchestrator(vec![ports]);
        let settings = TransformSettings {
            weight: true,
            ..TransformSettings::default()
        };

        engine
            .transform(&mut session, "ports", &TransformOptions::new(), &settings)
            .await
            .expect("transform");

        let domain = session
            .graph()
            .node(&derive_node_id("domain", "example.com"))
            .expect("domain");
        assert_eq!(domain.weight, 5);
    }

    /// T2.10: Extraction feeds the rewritten label to the job.
    #[tokio::test]
    async fn extraction_rewrites_input() {
        let mut session = Session::new();
        session
            .upsert(vec![NodeSpec::new("org", "ACME").with_prop("handle", "acme_inc")])
            .expect("upsert");
        let (echo, _) = fixed_entry(
            TransformDescriptor::new("echo", "Echo").types(["org"]),
            echo_label,
        );
        let engine = orchestrator(vec![echo]);
        let settings = TransformSettings {
            extract: Some(Extraction {
                property: "handle".into(),
                prefix: "@".into(),
                suffix: String::new(),
            }),
            ..TransformSettings::default()
        };

        let report = engine
            .transform(&mut session, "echo", &TransformOptions::new(), &settings)
            .await
            .expect("transform");

        assert_eq!(report.output[0].label.as_deref(), Some("@acme_inc"));
        let original = session.graph().node(&derive_node_id("org", "ACME")).expect("org");
        assert_eq!(original.label, "ACME");
    }
}

// =============================================================================
// TIER T3: PERSISTENCE
// =============================================================================

mod t3_persistence {
    use super::*;
    use recon_core::{graph_from_bytes, graph_to_bytes};

    /// T3.1: A session file written to disk restores the same graph.
    #[test]
    fn session_file_roundtrip() {
        let (mut session, _) = domain_session();
        session.group("Targets", None);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("recon.db");

        let bytes = graph_to_bytes(session.graph()).expect("serialize");
        std::fs::write(&path, &bytes).expect("write");
        let restored = graph_from_bytes(&std::fs::read(&path).expect("read")).expect("load");

        let mut reloaded = Session::with_graph(restored);
        assert_eq!(reloaded.serialize(), session.serialize());
        assert_eq!(reloaded.selection().len(), reloaded.graph().node_count());
        let grouped = reloaded.traverse(&["filter :child"]).expect("traverse");
        assert_eq!(grouped.len(), 1);
    }
}
