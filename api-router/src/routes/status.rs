use axum::{extract::{Path, State}, response::IntoResponse, Json};

use crate::{api_state::ApiState, error::ApiError};

/// Current `ProcessingStatus` for an upload. 404 if the id is unknown to the
/// Status Registry (never registered, or already cleaned up).
pub async fn get_status(
    State(state): State<ApiState>,
    Path(upload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .status
        .get(&upload_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no status for upload {upload_id}")))
}
