//! # recon
//!
//! The recon application: CLI, HTTP API and configuration around
//! `recon-core` and the bundled `recon-transforms` jobs.

pub mod api;
pub mod cli;
pub mod config;
pub mod scope;

use recon_core::{Orchestrator, TransformRegistry};
use std::sync::Arc;

/// Orchestrator over every bundled transform, tuned by `config`.
#[must_use]
pub fn build_orchestrator(config: &config::Config) -> Orchestrator {
    let mut registry = TransformRegistry::new();
    recon_transforms::register_all(&mut registry);
    Orchestrator::new(Arc::new(registry), config.engine)
}
