//! Semaphore group API handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use gatehouse_core::semaphore::SemaphoreGroup;

use super::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub root: String,
}

/// GET /api/v1/semaphore/{pipeline_id}/{group_id}
pub async fn latest_group(
    State(state): State<Arc<AppState>>,
    Path((pipeline_id, group_id)): Path<(String, String)>,
) -> Result<Json<SemaphoreGroup>, ApiError> {
    Ok(Json(
        state
            .service()
            .semaphore_group(&pipeline_id, &group_id)
            .await?,
    ))
}

/// GET /api/v1/semaphore/{pipeline_id}/{group_id}/root
pub async fn latest_root(
    State(state): State<Arc<AppState>>,
    Path((pipeline_id, group_id)): Path<(String, String)>,
) -> Result<Json<RootResponse>, ApiError> {
    let root = state
        .service()
        .semaphore_latest_root(&pipeline_id, &group_id)
        .await?;
    Ok(Json(RootResponse { root }))
}

/// GET /api/v1/semaphore/{pipeline_id}/{group_id}/{root}
///
/// A historic group by its root.
pub async fn group_by_root(
    State(state): State<Arc<AppState>>,
    Path((pipeline_id, group_id, root)): Path<(String, String, String)>,
) -> Result<Json<SemaphoreGroup>, ApiError> {
    Ok(Json(
        state
            .service()
            .semaphore_group_by_root(&pipeline_id, &group_id, &root)
            .await?,
    ))
}
