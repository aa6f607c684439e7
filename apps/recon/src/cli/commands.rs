//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::TransformArgs;
use crate::api::{self, AppState, SelectionResponse, TransformRequest};
use crate::build_orchestrator;
use crate::config::Config;
use crate::scope::Scope;
use recon_core::{
    ElementRef, Event, NodeSpec, ReconError, Selection, Session, TransformOptions,
    formats::MAX_PERSISTENCE_PAYLOAD_SIZE, graph_from_bytes, graph_from_json,
    graph_to_bytes, graph_to_json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for `add` (100 MB).
const MAX_INGEST_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum file size for `import` and for the session file (500 MB).
const MAX_IMPORT_FILE_SIZE: u64 = MAX_PERSISTENCE_PAYLOAD_SIZE as u64;

/// Flags shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub database: PathBuf,
    pub config: Option<PathBuf>,
    pub json_mode: bool,
    pub verbose: bool,
    pub quiet: bool,
}

impl Context {
    fn load_config(&self) -> Result<Config, ReconError> {
        Config::load(self.config.as_deref())
    }
}

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), ReconError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ReconError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(ReconError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve `path` to an existing regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, ReconError> {
    let canonical = path.canonicalize().map_err(|e| {
        ReconError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(ReconError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve the parent directory of an output file.
fn validate_output_path(path: &Path) -> Result<PathBuf, ReconError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        ReconError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(ReconError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| ReconError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn print_events(events: &[Event]) {
    for event in events {
        match &event.source {
            Some(source) => println!("  [{:?}] {}: {}", event.level, source, event.message),
            None => println!("  [{:?}] {}", event.level, event.message),
        }
    }
}

/// One line per element: `node <id> <type> <label>` or `edge <id> <source> -> <target>`.
fn print_selection(session: &Session, selection: &Selection) {
    for element in selection.iter() {
        match element {
            ElementRef::Node(id) => match session.graph().node(id) {
                Some(node) => println!("node  {}  {}  {}", node.id, node.node_type, node.label),
                None => println!("node  {}", id),
            },
            ElementRef::Edge(id) => match session.graph().edge(id) {
                Some(edge) => println!("edge  {}  {} -> {}", edge.id, edge.source, edge.target),
                None => println!("edge  {}", id),
            },
        }
    }
    println!("{} element(s)", selection.len());
}

fn apply_scope(ctx: &Context, session: &mut Session, scope: &Scope) -> Result<(), ReconError> {
    if scope.is_empty() && !ctx.quiet {
        tracing::info!(
            nodes = session.selection().len(),
            "no --select/--traverse given, operating on the whole graph"
        );
    }
    scope.apply(session)
}

// =============================================================================
// SESSION FILE
// =============================================================================

/// Load the session file, or start an empty session if it does not exist.
///
/// The working set of a freshly loaded session is the whole graph.
pub fn load_or_create_session(db_path: &Path) -> Result<Session, ReconError> {
    if !db_path.exists() {
        return Ok(Session::new());
    }
    validate_file_size(db_path, MAX_IMPORT_FILE_SIZE)?;
    let data = std::fs::read(db_path)
        .map_err(|e| ReconError::IoError(format!("Read session file: {}", e)))?;
    Ok(Session::with_graph(graph_from_bytes(&data)?))
}

/// Write the session's graph to the session file.
pub fn save_session(session: &Session, db_path: &Path) -> Result<(), ReconError> {
    let data = graph_to_bytes(session.graph())?;
    std::fs::write(db_path, &data)
        .map_err(|e| ReconError::IoError(format!("Write session file: {}", e)))
}

// =============================================================================
// INIT / STATUS
// =============================================================================

/// Create an empty session file.
pub fn cmd_init(ctx: &Context, force: bool) -> Result<(), ReconError> {
    if ctx.database.exists() && !force {
        return Err(ReconError::IoError(format!(
            "Session file {:?} already exists (use --force to overwrite)",
            ctx.database
        )));
    }
    save_session(&Session::new(), &ctx.database)?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "success": true,
            "database": ctx.database.to_string_lossy(),
        }));
    } else if !ctx.quiet {
        println!("Initialized empty session at {:?}", ctx.database);
    }
    Ok(())
}

/// Show node and edge counts, with nodes broken down by type.
pub fn cmd_status(ctx: &Context) -> Result<(), ReconError> {
    let session = load_or_create_session(&ctx.database)?;
    let graph = session.graph();

    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for node in graph.nodes() {
        *by_type.entry(node.node_type.as_str()).or_default() += 1;
    }
    let weighted = graph.nodes().filter(|node| node.weight > 0).count();

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "database": ctx.database.to_string_lossy(),
            "node_count": graph.node_count(),
            "edge_count": graph.edge_count(),
            "weighted_nodes": weighted,
            "types": by_type,
        }));
        return Ok(());
    }

    println!("Recon Graph Status");
    println!("==================");
    println!("Session: {:?}", ctx.database);
    println!();
    println!("Nodes:    {}", graph.node_count());
    println!("Edges:    {}", graph.edge_count());
    println!("Weighted: {}", weighted);
    if !by_type.is_empty() {
        println!();
        for (node_type, count) in &by_type {
            println!("  {:<16} {}", node_type, count);
        }
    }
    Ok(())
}

// =============================================================================
// ADD COMMAND
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum NodeFile {
    List(Vec<NodeSpec>),
    Wrapped { nodes: Vec<NodeSpec> },
}

impl NodeFile {
    fn into_specs(self) -> Vec<NodeSpec> {
        match self {
            Self::List(specs) | Self::Wrapped { nodes: specs } => specs,
        }
    }
}

/// Parse a node file: a JSON array of specs or `{"nodes": [...]}`.
pub fn parse_node_file(text: &str) -> Result<Vec<NodeSpec>, ReconError> {
    serde_json::from_str::<NodeFile>(text)
        .map(NodeFile::into_specs)
        .map_err(|e| ReconError::DeserializationError(format!("node file: {}", e)))
}

/// Upsert node specs from a JSON file.
pub fn cmd_add(ctx: &Context, file: &Path) -> Result<(), ReconError> {
    let path = validate_file_path(file)?;
    validate_file_size(&path, MAX_INGEST_FILE_SIZE)?;
    let text = std::fs::read_to_string(&path)
        .map_err(|e| ReconError::IoError(format!("Read node file: {}", e)))?;
    let specs = parse_node_file(&text)?;

    let mut session = load_or_create_session(&ctx.database)?;
    let report = session.upsert(specs)?;
    save_session(&session, &ctx.database)?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "success": true,
            "nodes": report.nodes.len(),
            "edges": report.edges.len(),
            "events": report.events,
        }));
        return Ok(());
    }

    if !ctx.quiet {
        println!(
            "Added {} node(s), {} edge(s), {} problem(s)",
            report.nodes.len(),
            report.edges.len(),
            report.error_count()
        );
    }
    if ctx.verbose || report.error_count() > 0 {
        print_events(&report.events);
    }
    Ok(())
}

// =============================================================================
// SELECT / TRAVERSE
// =============================================================================

fn show_selection(ctx: &Context, session: &Session) {
    if ctx.json_mode {
        print_json(&SelectionResponse::from_selection(session.selection()));
    } else {
        print_selection(session, session.selection());
    }
}

/// Print the elements matching the selectors.
pub fn cmd_select(ctx: &Context, expressions: &[String]) -> Result<(), ReconError> {
    let mut session = load_or_create_session(&ctx.database)?;
    session.select(expressions)?;
    show_selection(ctx, &session);
    Ok(())
}

/// Print the elements a traversal yields, starting from the whole graph.
pub fn cmd_traverse(ctx: &Context, expressions: &[String]) -> Result<(), ReconError> {
    let mut session = load_or_create_session(&ctx.database)?;
    session.traverse(expressions)?;
    show_selection(ctx, &session);
    Ok(())
}

// =============================================================================
// TRANSFORMS
// =============================================================================

/// List registered transforms in run order.
pub fn cmd_transforms(ctx: &Context) -> Result<(), ReconError> {
    let config = ctx.load_config()?;
    let orchestrator = build_orchestrator(&config);
    let descriptors: Vec<_> = orchestrator.registry().descriptors().collect();

    if ctx.json_mode {
        print_json(&descriptors);
        return Ok(());
    }

    for descriptor in descriptors {
        println!(
            "{:<24} {:<8} noise {:<3} [{}] {}",
            descriptor.name,
            descriptor.alias.join(","),
            descriptor.noise,
            descriptor.types.join(","),
            descriptor.title
        );
        if ctx.verbose {
            if !descriptor.description.is_empty() {
                println!("    {}", descriptor.description);
            }
            for (name, option) in &descriptor.options {
                println!("    --option {}=<{}>  {}", name, option.kind, option.description);
            }
        }
    }
    Ok(())
}

/// Run a transform over the scoped working set and save the result.
pub async fn cmd_transform(ctx: &Context, args: TransformArgs) -> Result<(), ReconError> {
    let config = ctx.load_config()?;
    let orchestrator = build_orchestrator(&config);

    let overrides: TransformOptions = args.options.into_iter().collect();
    let request = TransformRequest {
        name: args.name,
        scope: args.scope,
        options: overrides,
        group: args.group,
        weight: args.weight,
        noise: args.noise,
        name_filter: args.name_filter,
        alias_filter: args.alias_filter,
        title_filter: args.title_filter,
        tag_filter: args.tag_filter,
        extract: args.extract,
        prefix: args.prefix,
        suffix: args.suffix,
        max_nodes_warn: args.max_warn,
        max_nodes_cap: args.max_cap,
    };
    let settings = request.settings()?;
    let options = config.transform_options(orchestrator.registry(), &request.name, &request.options);

    let mut session = load_or_create_session(&ctx.database)?;
    apply_scope(ctx, &mut session, &request.scope)?;
    let report = orchestrator
        .transform(&mut session, &request.name, &options, &settings)
        .await?;
    save_session(&session, &ctx.database)?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "success": true,
            "produced": report.output.len(),
            "jobs": report.jobs,
            "events": report.events,
            "selection": SelectionResponse::from_selection(session.selection()),
        }));
        return Ok(());
    }

    for job in &report.jobs {
        let mut flags = Vec::new();
        if job.warned {
            flags.push("warned");
        }
        if job.capped {
            flags.push("capped");
        }
        println!(
            "{:<24} in {:<5} out {:<5} {}",
            job.name,
            job.input,
            job.output,
            flags.join(",")
        );
        if let Some(error) = &job.error {
            println!("    error: {}", error);
        }
    }
    if ctx.verbose {
        print_events(&report.events);
    }
    if !ctx.quiet {
        println!(
            "{} job(s), {} element(s) produced",
            report.jobs.len(),
            report.output.len()
        );
    }
    Ok(())
}

// =============================================================================
// GROUPING / MEASUREMENT / REMOVAL
// =============================================================================

/// Reparent the scoped working set under the group node for `label`.
pub fn cmd_group(ctx: &Context, label: &str, scope: &Scope) -> Result<(), ReconError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(ReconError::InvalidSpec("group label is empty".to_string()));
    }

    let mut session = load_or_create_session(&ctx.database)?;
    apply_scope(ctx, &mut session, scope)?;
    let group = session.group(label, None);
    let affected = session
        .selection()
        .node_ids()
        .filter(|id| *id != group)
        .count();
    save_session(&session, &ctx.database)?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "success": true,
            "affected": affected,
            "group": group,
        }));
    } else if !ctx.quiet {
        println!("Grouped {} node(s) under {}", affected, group);
    }
    Ok(())
}

/// Apply `operation` to the scoped working set and save.
pub fn cmd_scoped(
    ctx: &Context,
    scope: &Scope,
    verb: &str,
    operation: impl FnOnce(&mut Session) -> usize,
) -> Result<(), ReconError> {
    let mut session = load_or_create_session(&ctx.database)?;
    apply_scope(ctx, &mut session, scope)?;
    let affected = operation(&mut session);
    save_session(&session, &ctx.database)?;

    if ctx.json_mode {
        print_json(&serde_json::json!({ "success": true, "affected": affected }));
    } else if !ctx.quiet {
        println!("{} {} element(s)", verb, affected);
    }
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

/// Write the structural JSON form of the graph.
pub fn cmd_export(ctx: &Context, output: &Path) -> Result<(), ReconError> {
    let output = validate_output_path(output)?;
    let session = load_or_create_session(&ctx.database)?;
    let text = graph_to_json(session.graph())?;
    std::fs::write(&output, text)
        .map_err(|e| ReconError::IoError(format!("Write export: {}", e)))?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "success": true,
            "output": output.to_string_lossy(),
            "node_count": session.graph().node_count(),
            "edge_count": session.graph().edge_count(),
        }));
    } else if !ctx.quiet {
        println!(
            "Exported {} node(s), {} edge(s) to {:?}",
            session.graph().node_count(),
            session.graph().edge_count(),
            output
        );
    }
    Ok(())
}

/// Replace the session graph with a structural JSON file.
pub fn cmd_import(ctx: &Context, input: &Path) -> Result<(), ReconError> {
    let input = validate_file_path(input)?;
    validate_file_size(&input, MAX_IMPORT_FILE_SIZE)?;
    let text = std::fs::read_to_string(&input)
        .map_err(|e| ReconError::IoError(format!("Read import: {}", e)))?;
    let session = Session::with_graph(graph_from_json(&text)?);
    save_session(&session, &ctx.database)?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "success": true,
            "node_count": session.graph().node_count(),
            "edge_count": session.graph().edge_count(),
        }));
    } else if !ctx.quiet {
        println!(
            "Imported {} node(s), {} edge(s) into {:?}",
            session.graph().node_count(),
            session.graph().edge_count(),
            ctx.database
        );
    }
    Ok(())
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Serve the session over HTTP. The graph is saved back on Ctrl+C.
pub async fn cmd_server(
    ctx: &Context,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), ReconError> {
    let mut config = ctx.load_config()?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let session = load_or_create_session(&ctx.database)?;
    let orchestrator = build_orchestrator(&config);

    if !ctx.quiet {
        println!("Recon Server Starting...");
        println!();
        println!("Configuration:");
        println!("  Address:    {}", addr);
        println!("  Session:    {:?}", ctx.database);
        println!("  Transforms: {}", orchestrator.registry().len());
        println!(
            "  Auth:       {}",
            if config.server.api_key.is_some() { "api key" } else { "disabled" }
        );
        println!();
        println!("Press Ctrl+C to stop");
        println!();
    }

    let state = AppState::new(session, orchestrator, config);
    let shared = state.session.clone();
    api::run_server(&addr, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl+C: {}", e);
        }
    })
    .await?;

    let session = shared.read().await;
    save_session(&session, &ctx.database)?;
    tracing::info!(path = ?ctx.database, "session saved");
    Ok(())
}
