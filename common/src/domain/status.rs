use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Initialization,
    Validation,
    Conversion,
    Chunking,
    Ingestion,
    Completed,
    ValidationError,
    TimeoutError,
    UnknownError,
}

impl ProcessingStage {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ProcessingStage::ValidationError
                | ProcessingStage::TimeoutError
                | ProcessingStage::UnknownError
        )
    }

    /// Progress floor a stage guarantees on entry, per the orchestrator's
    /// stage table.
    pub fn progress_floor(&self) -> u8 {
        match self {
            ProcessingStage::Initialization => 0,
            ProcessingStage::Validation => 0,
            ProcessingStage::Conversion => 10,
            ProcessingStage::Chunking => 50,
            ProcessingStage::Ingestion => 75,
            ProcessingStage::Completed => 100,
            ProcessingStage::ValidationError
            | ProcessingStage::TimeoutError
            | ProcessingStage::UnknownError => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProgressDetail {
    pub current: u64,
    pub total: u64,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngestionProgress {
    pub chunks_completed: u32,
    pub chunks_total: u32,
    pub progress_pct: f32,
    pub current_chunk_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StageDurations {
    pub validation_secs: Option<f64>,
    pub conversion_secs: Option<f64>,
    pub chunking_secs: Option<f64>,
    pub ingestion_secs: Option<f64>,
}

/// Observational measurements gathered as an upload moves through the
/// pipeline. Fields are populated incrementally; absence before a stage
/// completes is expected, not an error.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metrics {
    pub file_size_mb: Option<f64>,
    pub pages: Option<u32>,
    pub conversion_duration: Option<f64>,
    pub num_chunks: Option<u32>,
    pub avg_chunk_size: Option<f64>,
    pub chunking_duration: Option<f64>,
    pub ingestion_duration: Option<f64>,
    pub entities: Option<u64>,
    pub relations: Option<u64>,
    pub window_utilization_pct: Option<f32>,
}

/// Single-writer record owned by the Orchestrator (and, during the
/// ingestion stage, the Ingestion Engine). Readers — the status HTTP
/// endpoint — only ever observe a snapshot; `set_progress` enforces the
/// monotonic-non-decreasing invariant so a reader never sees regression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub upload_id: String,
    pub status: UploadStatus,
    pub stage: ProcessingStage,
    pub sub_stage: Option<String>,
    pub progress: u8,
    pub progress_detail: Option<ProgressDetail>,
    pub ingestion_progress: Option<IngestionProgress>,
    pub metrics: Metrics,
    pub durations: StageDurations,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ProcessingStatus {
    pub fn new(upload_id: impl Into<String>) -> Self {
        Self {
            upload_id: upload_id.into(),
            status: UploadStatus::Processing,
            stage: ProcessingStage::Initialization,
            sub_stage: None,
            progress: 0,
            progress_detail: None,
            ingestion_progress: None,
            metrics: Metrics::default(),
            durations: StageDurations::default(),
            started_at: Utc::now(),
            completed_at: None,
            failed_at: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, UploadStatus::Completed | UploadStatus::Failed)
    }

    /// Advances `stage` and clamps `progress` to never decrease. A no-op
    /// once the status is terminal, per "once terminal, never mutated
    /// except by cleanup".
    pub fn enter_stage(&mut self, stage: ProcessingStage, progress: u8) {
        if self.is_terminal() {
            return;
        }
        self.stage = stage;
        self.progress = self.progress.max(progress);
    }

    pub fn set_progress(&mut self, progress: u8) {
        if self.is_terminal() {
            return;
        }
        self.progress = self.progress.max(progress).min(100);
    }

    pub fn mark_completed(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.stage = ProcessingStage::Completed;
        self.status = UploadStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, stage: ProcessingStage, error: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        debug_assert!(stage.is_error(), "mark_failed requires a *_error stage");
        self.stage = stage;
        self.status = UploadStatus::Failed;
        self.error = Some(error.into());
        self.failed_at = Some(Utc::now());
    }
}

/// In-memory keyed store backing the Status Registry (C6): single-writer
/// discipline enforced by the orchestrator/ingestion engine, concurrent
/// reads served from behind an `Arc<RwLock<..>>` at the call site.
pub type StatusMap = HashMap<String, ProcessingStatus>;

/// The Status Registry itself: an `Arc<RwLock<StatusMap>>` the Orchestrator
/// and Ingestion Engine write into and the status/logs HTTP endpoints read
/// from. Cloning a `StatusRegistry` shares the same underlying map.
#[derive(Clone, Default)]
pub struct StatusRegistry {
    entries: Arc<RwLock<StatusMap>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh `status=processing, stage=initialization, progress=0`
    /// entry, overwriting any prior entry for the same id. Called before any
    /// pipeline stage runs so the status endpoint never 404s right after upload.
    pub async fn register(&self, upload_id: impl Into<String>) -> ProcessingStatus {
        let status = ProcessingStatus::new(upload_id);
        let mut entries = self.entries.write().await;
        entries.insert(status.upload_id.clone(), status.clone());
        status
    }

    pub async fn get(&self, upload_id: &str) -> Option<ProcessingStatus> {
        self.entries.read().await.get(upload_id).cloned()
    }

    /// Applies `mutate` to the entry for `upload_id`, if one exists. Returns
    /// `false` if there was no entry to update.
    pub async fn update(&self, upload_id: &str, mutate: impl FnOnce(&mut ProcessingStatus)) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(upload_id) {
            Some(status) => {
                mutate(status);
                true
            }
            None => false,
        }
    }

    /// Removes terminal entries whose `started_at` is older than `max_age`.
    /// Non-terminal entries are never removed regardless of age. Returns the
    /// number of entries removed.
    pub async fn cleanup(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, status| !(status.is_terminal() && status.started_at < cutoff));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
