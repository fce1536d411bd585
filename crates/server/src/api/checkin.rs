//! Check-in API handlers, online and offline.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use gatehouse_core::pipeline::{
    CheckinRequest, CheckinResult, OfflineTicketsRequest, OfflineTicketsResponse,
    OfflineUploadRequest,
};

use super::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct OfflineUploadResponse {
    pub queued: usize,
}

/// POST /api/v1/checkin
///
/// Always answers 200; refusals are reported in the result body.
pub async fn check_in(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CheckinRequest>,
) -> Json<CheckinResult> {
    Json(state.service().check_in(&request).await)
}

/// POST /api/v1/offline/checkin
pub async fn upload_offline_checkins(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OfflineUploadRequest>,
) -> Result<Json<OfflineUploadResponse>, ApiError> {
    let queued = state.service().upload_offline_checkins(&request).await?;
    Ok(Json(OfflineUploadResponse { queued }))
}

/// POST /api/v1/offline/tickets
pub async fn offline_tickets(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OfflineTicketsRequest>,
) -> Result<Json<OfflineTicketsResponse>, ApiError> {
    Ok(Json(state.service().offline_tickets(&request).await?))
}
