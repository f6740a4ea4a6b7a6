use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of work handed to the Document Queue: raw bytes received over the
/// upload endpoint, identified for the rest of the system by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: String,
    pub filename: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub received_at: DateTime<Utc>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, size_bytes: u64, content_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.into(),
            size_bytes,
            content_type: content_type.into(),
            received_at: Utc::now(),
        }
    }

    /// Storage path convention for the raw upload: `{upload_id}_{filename}`.
    pub fn storage_key(&self) -> String {
        format!("{}_{}", self.id, self.filename)
    }
}
