//! # Transform Contract
//!
//! The interface every enrichment job implements.
//!
//! A job receives a snapshot of the input nodes plus free-form options and
//! returns node specs to merge back into the graph. While running it may
//! emit events and report `progress(step, total)` through its
//! `TransformContext`; both are advisory.

use crate::events::{Event, EventLevel, EventSink, NullSink};
use crate::types::{Node, NodeSpec};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Free-form run options (`shodanKey`, `extraQuery`, ...).
pub type TransformOptions = Map<String, Value>;

/// Job-level failure. The orchestrator turns it into a warning plus an
/// error event and zero results.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("missing option {0}")]
    MissingOption(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

/// Read a string option, treating blank values as absent.
#[must_use]
pub fn string_option<'a>(options: &'a TransformOptions, key: &str) -> Option<&'a str> {
    options
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

// =============================================================================
// PROGRESS
// =============================================================================

/// Last reported position of a running job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub step: usize,
    pub total: usize,
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Per-run handle a job uses to report events and progress.
pub struct TransformContext {
    source: String,
    sink: Arc<dyn EventSink>,
    progress: watch::Sender<Progress>,
}

impl TransformContext {
    /// Context reporting to `sink`, plus the receiving end of its progress
    /// channel.
    #[must_use]
    pub fn new(source: impl Into<String>, sink: Arc<dyn EventSink>) -> (Self, watch::Receiver<Progress>) {
        let (progress, receiver) = watch::channel(Progress::default());
        let context = Self {
            source: source.into(),
            sink,
            progress,
        };
        (context, receiver)
    }

    /// Context that discards everything. Useful for driving a job directly.
    #[must_use]
    pub fn detached(source: impl Into<String>) -> Self {
        Self::new(source, Arc::new(NullSink)).0
    }

    /// Title of the job this context belongs to.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn emit(&self, level: EventLevel, message: impl Into<String>) {
        self.sink
            .emit(&Event::new(level, message).with_source(self.source.clone()));
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(EventLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(EventLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(EventLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(EventLevel::Error, message);
    }

    /// Record the current position. Never blocks, even with no observer.
    pub fn progress(&self, step: usize, total: usize) {
        self.progress.send_replace(Progress { step, total });
    }
}

// =============================================================================
// TRANSFORM TRAIT
// =============================================================================

/// An enrichment job.
///
/// Implement `handle` for per-node jobs; override `run` when the job wants
/// to batch or parallelise over its input itself.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Produce specs for one input node.
    async fn handle(
        &self,
        node: &Node,
        options: &TransformOptions,
        ctx: &TransformContext,
    ) -> Result<Vec<NodeSpec>, TransformError>;

    /// Produce specs for every input node, reporting progress per node.
    async fn run(
        &self,
        nodes: Vec<Node>,
        options: &TransformOptions,
        ctx: &TransformContext,
    ) -> Result<Vec<NodeSpec>, TransformError> {
        let total = nodes.len();
        let mut results = Vec::new();
        for (step, node) in nodes.iter().enumerate() {
            ctx.progress(step, total);
            results.extend(self.handle(node, options, ctx).await?);
        }
        ctx.progress(total, total);
        Ok(results)
    }
}
