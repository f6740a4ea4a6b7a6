use std::time::Duration;

use chrono::Duration as ChronoDuration;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::ingestion_payload::IngestionPayload;

pub const MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LEASE_SECS: u32 = 300;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Reserved,
    Processing,
    Succeeded,
    Failed,
    DeadLetter,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "Pending",
            TaskState::Reserved => "Reserved",
            TaskState::Processing => "Processing",
            TaskState::Succeeded => "Succeeded",
            TaskState::Failed => "Failed",
            TaskState::DeadLetter => "DeadLetter",
        }
    }

    pub fn display_label(&self) -> &'static str {
        match self {
            TaskState::Pending => "Waiting",
            TaskState::Reserved => "Reserved",
            TaskState::Processing => "Processing",
            TaskState::Succeeded => "Completed",
            TaskState::Failed => "Failed, retrying",
            TaskState::DeadLetter => "Failed permanently",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskErrorInfo {
    pub code: Option<String>,
    pub message: String,
}

stored_object!(IngestionTask, "job", {
    content: IngestionPayload,
    user_id: String,
    state: TaskState,
    attempts: u32,
    max_attempts: u32,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    scheduled_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime", default)]
    locked_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime", default)]
    last_error_at: Option<DateTime<Utc>>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    worker_id: Option<String>,
    #[serde(default)]
    priority: i32,
    lease_duration_secs: i64
});

impl IngestionTask {
    pub async fn new(content: IngestionPayload, user_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            content,
            user_id,
            state: TaskState::Pending,
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
            scheduled_at: now,
            locked_at: None,
            last_error_at: None,
            error_message: None,
            worker_id: None,
            priority: 0,
            lease_duration_secs: i64::from(DEFAULT_LEASE_SECS),
        }
    }

    /// Creates a new job, stores it, and returns the stored copy.
    pub async fn create_and_add_to_db(
        content: IngestionPayload,
        user_id: String,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let task = Self::new(content, user_id).await;
        db.store_item(task.clone()).await?;
        Ok(task)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.lease_duration_secs.max(0)).unwrap_or(0))
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Reserves the oldest ready task for `worker_id`, if any exists. Candidates are
    /// re-checked against their expected state at claim time so two workers racing
    /// for the same row can't both walk away believing they own it.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<Option<Self>, AppError> {
        #[derive(Deserialize)]
        struct IdRow {
            #[serde(deserialize_with = "deserialize_flexible_id")]
            id: String,
        }

        let candidates: Vec<IdRow> = db
            .client
            .query(
                "SELECT id FROM type::table($table)
                 WHERE scheduled_at <= $now
                   AND (state = $pending OR (state = $failed AND attempts < max_attempts))
                 ORDER BY scheduled_at ASC
                 LIMIT 10",
            )
            .bind(("table", Self::table_name()))
            .bind(("now", now))
            .bind(("pending", TaskState::Pending.as_str()))
            .bind(("failed", TaskState::Failed.as_str()))
            .await?
            .take(0)?;

        let lease_secs = i64::try_from(lease_duration.as_secs())
            .unwrap_or_else(|_| i64::from(DEFAULT_LEASE_SECS));

        for candidate in candidates {
            let claimed: Option<Self> = db
                .client
                .query(
                    "UPDATE type::thing($table, $id)
                     SET state = $reserved, worker_id = $worker_id, locked_at = $now,
                         lease_duration_secs = $lease_secs
                     WHERE state = $pending OR (state = $failed AND attempts < max_attempts)
                     RETURN AFTER",
                )
                .bind(("table", Self::table_name()))
                .bind(("id", candidate.id))
                .bind(("reserved", TaskState::Reserved.as_str()))
                .bind(("worker_id", worker_id.to_string()))
                .bind(("now", now))
                .bind(("lease_secs", lease_secs))
                .bind(("pending", TaskState::Pending.as_str()))
                .bind(("failed", TaskState::Failed.as_str()))
                .await?
                .take(0)?;

            if let Some(task) = claimed {
                return Ok(Some(task));
            }
        }

        Ok(None)
    }

    pub async fn mark_processing(mut self, db: &SurrealDbClient) -> Result<Self, AppError> {
        self.state = TaskState::Processing;
        self.attempts = self.attempts.saturating_add(1);
        self.updated_at = Utc::now();
        db.store_item(self.clone()).await?;
        Ok(self)
    }

    pub async fn mark_succeeded(&mut self, db: &SurrealDbClient) -> Result<(), AppError> {
        self.state = TaskState::Succeeded;
        self.worker_id = None;
        self.updated_at = Utc::now();
        db.store_item(self.clone()).await?;
        Ok(())
    }

    /// Mutates this task into its failed, retry-scheduled state and returns a
    /// stored snapshot so callers choosing to dead-letter it don't need to
    /// touch `self` again.
    pub async fn mark_failed(
        &mut self,
        error: TaskErrorInfo,
        retry_delay: Duration,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let now = Utc::now();
        self.state = TaskState::Failed;
        self.error_message = Some(error.message);
        self.last_error_at = Some(now);
        self.worker_id = None;
        self.scheduled_at = now + ChronoDuration::from_std(retry_delay).unwrap_or_default();
        self.updated_at = now;
        db.store_item(self.clone()).await?;
        Ok(self.clone())
    }

    pub async fn mark_dead_letter(
        &mut self,
        error: TaskErrorInfo,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        self.state = TaskState::DeadLetter;
        self.error_message = Some(error.message);
        self.last_error_at = Some(Utc::now());
        self.worker_id = None;
        self.updated_at = Utc::now();
        db.store_item(self.clone()).await?;
        Ok(())
    }
}
