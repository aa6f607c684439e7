//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.
//!
//! Every handler that changes the working set answers with the resulting
//! selection. Engine errors map to `400` for bad input, `404` for missing
//! elements and `500` otherwise.

use super::{
    AppState,
    types::{
        AddNodesRequest, AddNodesResponse, ErrorResponse, ExpressionsRequest, HealthResponse,
        ScopedRequest, ScopedResponse, SelectionResponse, StatusResponse, TransformRequest,
        TransformResponse,
    },
};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use recon_core::{ReconError, SerializableGraph, Session, TransformDescriptor};

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// A failed request: status code plus message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

/// HTTP status for an engine error.
#[must_use]
pub fn status_for(error: &ReconError) -> StatusCode {
    match error {
        ReconError::InvalidSpec(_)
        | ReconError::InvalidSelector { .. }
        | ReconError::UnknownTraversal(_)
        | ReconError::UnknownTransform(_)
        | ReconError::InvalidPattern { .. }
        | ReconError::DeserializationError(_) => StatusCode::BAD_REQUEST,
        ReconError::NodeNotFound(_) | ReconError::EdgeNotFound(_) => StatusCode::NOT_FOUND,
        ReconError::SerializationError(_)
        | ReconError::IoError(_)
        | ReconError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ReconError> for ApiError {
    fn from(error: ReconError) -> Self {
        Self {
            status: status_for(&error),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse::new(self.message))).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

// =============================================================================
// READ-ONLY HANDLERS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let session = state.session.read().await;
    Json(StatusResponse {
        node_count: session.graph().node_count(),
        edge_count: session.graph().edge_count(),
        selected: session.selection().len(),
        transforms: state.orchestrator.registry().len(),
    })
}

pub async fn selection_handler(State(state): State<AppState>) -> Json<SelectionResponse> {
    let session = state.session.read().await;
    Json(SelectionResponse::from_selection(session.selection()))
}

/// Metadata of every registered transform.
pub async fn transforms_handler(State(state): State<AppState>) -> Json<Vec<TransformDescriptor>> {
    Json(state.orchestrator.registry().descriptors().cloned().collect())
}

/// Structural form of the whole graph.
pub async fn export_handler(State(state): State<AppState>) -> Json<SerializableGraph> {
    let session = state.session.read().await;
    Json(session.serialize())
}

// =============================================================================
// WORKING-SET HANDLERS
// =============================================================================

/// Upsert a batch of node specs. Per-element problems come back as events.
pub async fn add_nodes_handler(
    State(state): State<AppState>,
    Json(request): Json<AddNodesRequest>,
) -> ApiResult<AddNodesResponse> {
    let mut session = state.session.write().await;
    let report = session.upsert(request.nodes)?;
    Ok(Json(AddNodesResponse {
        success: true,
        nodes: report.nodes.len(),
        edges: report.edges.len(),
        events: report.events,
        selection: SelectionResponse::from_selection(session.selection()),
    }))
}

pub async fn select_handler(
    State(state): State<AppState>,
    Json(request): Json<ExpressionsRequest>,
) -> ApiResult<SelectionResponse> {
    let mut session = state.session.write().await;
    let selection = session.select(&request.expressions)?;
    Ok(Json(SelectionResponse::from_selection(selection)))
}

pub async fn traverse_handler(
    State(state): State<AppState>,
    Json(request): Json<ExpressionsRequest>,
) -> ApiResult<SelectionResponse> {
    let mut session = state.session.write().await;
    let selection = session.traverse(&request.expressions)?;
    Ok(Json(SelectionResponse::from_selection(selection)))
}

/// Run a transform over the (optionally re-scoped) working set.
///
/// The session stays write-locked for the whole run so no other call can
/// change the working set underneath it.
pub async fn transform_handler(
    State(state): State<AppState>,
    Json(request): Json<TransformRequest>,
) -> ApiResult<TransformResponse> {
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("missing transform name"));
    }
    let settings = request.settings()?;
    let registry = state.orchestrator.registry();
    let options = state
        .config
        .transform_options(registry, &request.name, &request.options);

    let mut session = state.session.write().await;
    request.scope.apply(&mut session)?;
    let report = state
        .orchestrator
        .transform(&mut session, &request.name, &options, &settings)
        .await?;

    Ok(Json(TransformResponse {
        success: true,
        produced: report.output.len(),
        jobs: report.jobs,
        events: report.events,
        selection: SelectionResponse::from_selection(session.selection()),
    }))
}

async fn scoped(
    state: &AppState,
    request: &ScopedRequest,
    operation: impl FnOnce(&mut Session) -> usize,
) -> ApiResult<ScopedResponse> {
    let mut session = state.session.write().await;
    request.scope.apply(&mut session)?;
    Ok(Json(ScopedResponse {
        success: true,
        affected: operation(&mut session),
        group: None,
    }))
}

/// Reparent the working set under the group node for `label`.
pub async fn group_handler(
    State(state): State<AppState>,
    Json(request): Json<ScopedRequest>,
) -> ApiResult<ScopedResponse> {
    let label = request
        .label
        .as_deref()
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing group label"))?
        .to_string();

    let mut session = state.session.write().await;
    request.scope.apply(&mut session)?;
    let group = session.group(&label, None);
    let affected = session
        .selection()
        .node_ids()
        .filter(|id| *id != group)
        .count();
    Ok(Json(ScopedResponse {
        success: true,
        affected,
        group: Some(group),
    }))
}

pub async fn ungroup_handler(
    State(state): State<AppState>,
    Json(request): Json<ScopedRequest>,
) -> ApiResult<ScopedResponse> {
    scoped(&state, &request, |session| session.ungroup(None)).await
}

pub async fn measure_handler(
    State(state): State<AppState>,
    Json(request): Json<ScopedRequest>,
) -> ApiResult<ScopedResponse> {
    scoped(&state, &request, |session| session.measure(None)).await
}

pub async fn unmeasure_handler(
    State(state): State<AppState>,
    Json(request): Json<ScopedRequest>,
) -> ApiResult<ScopedResponse> {
    scoped(&state, &request, |session| session.unmeasure(None)).await
}

/// Remove the working set. Removing a node takes its edges with it.
pub async fn remove_handler(
    State(state): State<AppState>,
    Json(request): Json<ScopedRequest>,
) -> ApiResult<ScopedResponse> {
    scoped(&state, &request, |session| session.remove(None).len()).await
}
