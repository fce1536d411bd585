//! Feed API handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use gatehouse_core::{
    pipeline::{PollFeedRequest, PollFeedResponse},
    SerializedCredential,
};

use super::ApiError;
use crate::state::AppState;

/// Body of a feed poll. The feed id comes from the path.
#[derive(Debug, Default, Deserialize)]
pub struct PollFeedBody {
    #[serde(default)]
    pub credential: Option<SerializedCredential>,
}

/// POST /api/v1/feeds/{feed_id}
///
/// Issue the caller's tickets as feed actions.
pub async fn poll_feed(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<String>,
    Json(body): Json<PollFeedBody>,
) -> Result<Json<PollFeedResponse>, ApiError> {
    let request = PollFeedRequest {
        feed_id,
        credential: body.credential,
    };
    Ok(Json(state.service().poll_feed(&request).await?))
}
