use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub confirm: bool,
    #[serde(default)]
    pub code: String,
}

/// Destructive clear of the graph store. Refuses without the confirmation
/// code; backs up via `export` first, unconditionally, per the mandatory
/// pre-backup invariant.
pub async fn clear(
    State(state): State<ApiState>,
    Json(request): Json<ClearRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .management
        .clear(request.confirm, &request.code, true)
        .await?;

    Ok(Json(result))
}
