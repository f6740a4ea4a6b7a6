use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use common::domain::{ProcessingStatus, UploadStatus};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
    pub level: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: &'static str,
    pub message: String,
}

/// Synthesizes a chronological log from a `ProcessingStatus` snapshot; there
/// is no separate per-upload log store, so entries are derived from the
/// stage durations and terminal outcome the status already carries.
fn synthesize_logs(status: &ProcessingStatus) -> Vec<LogEntry> {
    let mut logs = vec![LogEntry {
        timestamp: status.started_at,
        level: "info",
        message: format!("upload {} accepted", status.upload_id),
    }];

    let durations = &status.durations;
    if let Some(secs) = durations.validation_secs {
        logs.push(LogEntry {
            timestamp: status.started_at,
            level: "info",
            message: format!("validation completed in {secs:.3}s"),
        });
    }
    if let Some(secs) = durations.conversion_secs {
        logs.push(LogEntry {
            timestamp: status.started_at,
            level: "info",
            message: format!("conversion completed in {secs:.3}s"),
        });
    }
    if let Some(secs) = durations.chunking_secs {
        logs.push(LogEntry {
            timestamp: status.started_at,
            level: "info",
            message: format!("chunking completed in {secs:.3}s"),
        });
    }
    if let Some(secs) = durations.ingestion_secs {
        logs.push(LogEntry {
            timestamp: status.started_at,
            level: "info",
            message: format!("ingestion completed in {secs:.3}s"),
        });
    }

    if let Some(error) = &status.error {
        logs.push(LogEntry {
            timestamp: status.failed_at.unwrap_or(status.started_at),
            level: "error",
            message: error.clone(),
        });
    } else if status.status == UploadStatus::Completed {
        logs.push(LogEntry {
            timestamp: status.completed_at.unwrap_or(status.started_at),
            level: "info",
            message: "ingestion pipeline completed".to_string(),
        });
    }

    logs
}

/// Synthesized log entries derived from status transitions. Optional
/// `limit` keeps only the most recent N entries; optional `level` keeps
/// only entries at that level.
pub async fn get_logs(
    State(state): State<ApiState>,
    Path(upload_id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state
        .status
        .get(&upload_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no status for upload {upload_id}")))?;

    let mut logs = synthesize_logs(&status);

    if let Some(level) = &query.level {
        logs.retain(|entry| entry.level.eq_ignore_ascii_case(level));
    }
    if let Some(limit) = query.limit {
        let skip = logs.len().saturating_sub(limit);
        logs.drain(..skip);
    }

    Ok(Json(logs))
}
