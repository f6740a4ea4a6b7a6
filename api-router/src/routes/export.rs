use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "json".to_string()
}

/// JSON or Cypher-shaped export of the graph's entities and relations,
/// written through the storage abstraction.
pub async fn export(
    State(state): State<ApiState>,
    Json(request): Json<ExportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.management.export(&request.format).await?;

    Ok(Json(json!({
        "export_id": result.export_id,
        "download_url": format!("/{}", result.download_path),
        "size_bytes": result.size_bytes,
        "record_count": result.record_count,
    })))
}
