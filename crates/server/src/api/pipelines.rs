//! Operator API handlers for pipeline definitions and diagnostics.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use gatehouse_core::{
    pipeline::DefinitionDraft, LoadSummary, PipelineDefinition, PipelineStatusView, SlotState,
};

use super::middleware::OperatorEmail;
use super::ApiError;
use crate::state::AppState;

/// Response for a create or edit. `state` is the slot state once the
/// restart has settled, or `None` if the restart task was lost.
#[derive(Debug, Serialize)]
pub struct UpsertPipelineResponse {
    pub definition: PipelineDefinition,
    pub state: Option<SlotState>,
}

/// GET /api/v1/pipelines
pub async fn list_pipelines(
    State(state): State<Arc<AppState>>,
    OperatorEmail(email): OperatorEmail,
) -> Result<Json<Vec<PipelineDefinition>>, ApiError> {
    Ok(Json(state.service().list_definitions(&email)?))
}

/// PUT /api/v1/pipelines
///
/// Create or edit a definition and wait for the pipeline restart.
pub async fn upsert_pipeline(
    State(state): State<Arc<AppState>>,
    OperatorEmail(email): OperatorEmail,
    Json(draft): Json<DefinitionDraft>,
) -> Result<Json<UpsertPipelineResponse>, ApiError> {
    let result = state.service().upsert_definition(&email, draft).await?;
    let slot_state = result.restart.await.ok();
    info!(
        pipeline_id = %result.definition.id,
        operator = %email,
        state = ?slot_state,
        "Pipeline definition upserted"
    );
    Ok(Json(UpsertPipelineResponse {
        definition: result.definition,
        state: slot_state,
    }))
}

/// GET /api/v1/pipelines/{id}
pub async fn get_pipeline(
    State(state): State<Arc<AppState>>,
    OperatorEmail(email): OperatorEmail,
    Path(id): Path<String>,
) -> Result<Json<PipelineDefinition>, ApiError> {
    Ok(Json(state.service().get_definition(&email, &id)?))
}

/// DELETE /api/v1/pipelines/{id}
pub async fn delete_pipeline(
    State(state): State<Arc<AppState>>,
    OperatorEmail(email): OperatorEmail,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service().delete_definition(&email, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/pipelines/{id}/info
pub async fn pipeline_info(
    State(state): State<Arc<AppState>>,
    OperatorEmail(email): OperatorEmail,
    Path(id): Path<String>,
) -> Result<Json<PipelineStatusView>, ApiError> {
    Ok(Json(state.service().pipeline_info(&email, &id).await?))
}

/// POST /api/v1/pipelines/{id}/load
pub async fn perform_load(
    State(state): State<Arc<AppState>>,
    OperatorEmail(email): OperatorEmail,
    Path(id): Path<String>,
) -> Result<Json<LoadSummary>, ApiError> {
    Ok(Json(state.service().perform_load(&email, &id).await?))
}

/// DELETE /api/v1/pipelines/{id}/offline/{ticket_id}
pub async fn delete_offline_checkin(
    State(state): State<Arc<AppState>>,
    OperatorEmail(email): OperatorEmail,
    Path((id, ticket_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state
        .service()
        .delete_offline_checkin(&email, &id, &ticket_id)?;
    Ok(StatusCode::NO_CONTENT)
}
