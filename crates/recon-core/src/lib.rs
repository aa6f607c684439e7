//! # recon-core
//!
//! The reconnaissance graph engine - THE LOGIC.
//!
//! This crate holds a mutable entity-relationship graph (hosts, domains,
//! accounts, organizations, ...), lets a caller select and traverse subsets
//! of it, and enriches it by running pluggable transforms whose output is
//! merged back through deterministic identity rules.
//!
//! ## Architectural Constraints
//!
//! - Deterministic ordering: every map is a `BTreeMap`
//! - Identity is derived, never random: `(type, label)` for nodes,
//!   `(type, source, target)` for edges
//! - The working set is explicit `Session` state
//! - Diagnostics go through `EventSink`, never straight to a logger
//! - The core performs no network I/O; transforms own that

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod detect;
pub mod events;
pub mod formats;
pub mod graph;
pub mod identity;
pub mod orchestrator;
pub mod primitives;
pub mod registry;
pub mod selector;
pub mod session;
pub mod transform;
pub mod traverse;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    Attributes, Edge, EdgeSpec, ElementRef, Node, NodeSpec, ReconError, Selection, kind,
};

// =============================================================================
// RE-EXPORTS: Graph Engine
// =============================================================================

pub use config::EngineConfig;
pub use events::{CollectingSink, Event, EventLevel, EventSink, NullSink, TracingSink};
pub use graph::{Graph, SerializableGraph, UpsertReport};
pub use identity::{derive_edge_id, derive_group_id, derive_node_id};
pub use selector::Selector;
pub use session::Session;
pub use traverse::{TraversalPipeline, TraverseFn};

// =============================================================================
// RE-EXPORTS: Transform Pipeline
// =============================================================================

pub use orchestrator::{
    Extraction, JobReport, Orchestrator, TransformFilter, TransformReport, TransformSettings,
};
pub use registry::{OptionSpec, TransformDescriptor, TransformEntry, TransformRegistry};
pub use transform::{
    Progress, Transform, TransformContext, TransformError, TransformOptions, string_option,
};

// =============================================================================
// RE-EXPORTS: Formats
// =============================================================================

pub use formats::{
    PersistenceHeader, graph_from_bytes, graph_from_json, graph_to_bytes, graph_to_json,
};
