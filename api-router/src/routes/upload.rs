use axum::{extract::State, response::IntoResponse, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use common::{
    domain::QueueEntry,
    error::AppError,
    utils::ingest_limits::{validate_upload, UploadValidationError},
};
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::info;
use uuid::Uuid;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    pub group_id: Option<String>,
    pub file: FieldData<NamedTempFile>,
}

impl From<UploadValidationError> for ApiError {
    fn from(err: UploadValidationError) -> Self {
        match err {
            UploadValidationError::TooLarge { .. } => Self::PayloadTooLarge(err.to_string()),
            _ => Self::ValidationError(err.to_string()),
        }
    }
}

/// Accepts a multipart upload, persists it as `{upload_id}_{filename}` under
/// the configured upload directory, registers a status entry, and enqueues
/// it on the Document Queue.
pub async fn upload(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filename = input
        .file
        .metadata
        .file_name
        .clone()
        .unwrap_or_else(|| "upload".to_string());
    let upload_id = Uuid::new_v4().to_string();

    let upload_dir = std::path::Path::new(&state.config.data_dir).join("uploads");
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .map_err(AppError::from)?;
    let dest_path = upload_dir.join(format!("{upload_id}_{filename}"));

    input
        .file
        .contents
        .persist(&dest_path)
        .map_err(|err| ApiError::InternalError(err.to_string()))?;

    validate_upload(&dest_path, &state.config)?;

    state.status.register(&upload_id).await;
    let entry = QueueEntry::new(
        upload_id.clone(),
        filename.clone(),
        dest_path.display().to_string(),
        input.group_id,
    );
    let position = state.queue.enqueue(entry).await;
    info!(%upload_id, %filename, position, "upload accepted and queued");

    Ok(Json(json!({
        "upload_id": upload_id,
        "filename": filename,
        "status": "processing",
        "message": format!("queued at position {position}"),
    })))
}
