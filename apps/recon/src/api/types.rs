//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API.

use crate::scope::Scope;
use recon_core::{
    ElementRef, Event, Extraction, JobReport, NodeSpec, ReconError, Selection, TransformFilter,
    TransformOptions, TransformSettings,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH / STATUS
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Graph status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub node_count: usize,
    pub edge_count: usize,
    pub selected: usize,
    pub transforms: usize,
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

// =============================================================================
// SELECTION
// =============================================================================

/// The working set after a call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionResponse {
    pub success: bool,
    pub count: usize,
    pub elements: Vec<ElementRef>,
}

impl SelectionResponse {
    #[must_use]
    pub fn from_selection(selection: &Selection) -> Self {
        Self {
            success: true,
            count: selection.len(),
            elements: selection.iter().cloned().collect(),
        }
    }
}

/// Body of `POST /select` and `POST /traverse`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpressionsRequest {
    #[serde(default)]
    pub expressions: Vec<String>,
}

// =============================================================================
// NODES
// =============================================================================

/// Body of `POST /nodes`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddNodesRequest {
    pub nodes: Vec<NodeSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddNodesResponse {
    pub success: bool,
    /// Nodes created or merged.
    pub nodes: usize,
    /// Edges created or merged.
    pub edges: usize,
    /// Per-element problems; the rest of the batch was still applied.
    pub events: Vec<Event>,
    pub selection: SelectionResponse,
}

// =============================================================================
// TRANSFORM
// =============================================================================

/// Body of `POST /transform`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformRequest {
    /// Transform name, alias or `*`.
    pub name: String,
    #[serde(flatten)]
    pub scope: Scope,
    pub options: TransformOptions,
    pub group: bool,
    pub weight: bool,
    pub noise: Option<u32>,
    pub name_filter: Option<String>,
    pub alias_filter: Option<String>,
    pub title_filter: Option<String>,
    pub tag_filter: Option<String>,
    /// Property path whose value replaces each input label.
    pub extract: Option<String>,
    pub prefix: String,
    pub suffix: String,
    pub max_nodes_warn: Option<usize>,
    pub max_nodes_cap: Option<usize>,
}

impl TransformRequest {
    /// Orchestrator settings. A filter is built only when a filter field is
    /// present.
    pub fn settings(&self) -> Result<TransformSettings, ReconError> {
        let patterns = [
            &self.name_filter,
            &self.alias_filter,
            &self.title_filter,
            &self.tag_filter,
        ];
        let filter = if self.noise.is_some() || patterns.iter().any(|p| p.is_some()) {
            let mut filter = TransformFilter::new();
            if let Some(noise) = self.noise {
                filter = filter.with_noise(noise);
            }
            if let Some(pattern) = &self.name_filter {
                filter = filter.with_name(pattern)?;
            }
            if let Some(pattern) = &self.alias_filter {
                filter = filter.with_alias(pattern)?;
            }
            if let Some(pattern) = &self.title_filter {
                filter = filter.with_title(pattern)?;
            }
            if let Some(pattern) = &self.tag_filter {
                filter = filter.with_tag(pattern)?;
            }
            Some(filter)
        } else {
            None
        };

        Ok(TransformSettings {
            group: self.group,
            weight: self.weight,
            filter,
            extract: self.extract.as_ref().map(|property| Extraction {
                property: property.clone(),
                prefix: self.prefix.clone(),
                suffix: self.suffix.clone(),
            }),
            max_nodes_warn: self.max_nodes_warn,
            max_nodes_cap: self.max_nodes_cap,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformResponse {
    pub success: bool,
    /// Specs returned by all jobs, after grouping and caps.
    pub produced: usize,
    pub jobs: Vec<JobReport>,
    pub events: Vec<Event>,
    pub selection: SelectionResponse,
}

// =============================================================================
// GROUPING / MEASUREMENT / REMOVAL
// =============================================================================

/// Body of the working-set operations (`/group`, `/ungroup`, `/measure`,
/// `/unmeasure`, `/remove`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopedRequest {
    /// Group label (`/group` only).
    pub label: Option<String>,
    #[serde(flatten)]
    pub scope: Scope,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopedResponse {
    pub success: bool,
    /// Elements affected by the call.
    pub affected: usize,
    /// Group id (`/group` only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}
