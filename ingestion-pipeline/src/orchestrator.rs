//! Pipeline Orchestrator (C7): sequences validation, conversion, chunking,
//! and ingestion for a single queued upload. Every stage transition and
//! metric lands in the Status Registry; the orchestrator never re-raises out
//! of the background task that drives it, per the "background tasks must
//! always land in a terminal `ProcessingStatus`" propagation policy.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use common::{
    domain::{
        Chunk, Converter, GraphStore, IngestionProgress, ProcessingStage, QueueEntry,
        StatusRegistry,
    },
    error::AppError,
    utils::{config::AppConfig, ingest_limits::validate_upload},
};
use tracing::{error, info, warn};

use crate::{chunking::SemanticChunker, rate_limiter::RateLimiter};

/// Hard per-chunk timeout on `GraphStore::add_episode`, independent of the
/// task-level retry policy around the whole pipeline run.
const CHUNK_INGEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A failure of the pipeline as a whole (not a single chunk within the
/// ingestion loop), tagged with the terminal stage it should surface as.
/// Validation failures are permanent and never retried; conversion/chunking/
/// ingestion failures are retried at the task level before dead-lettering.
enum StageFailure {
    Validation(String),
    Timeout(String),
    Unknown(String),
}

impl StageFailure {
    fn retryable(&self) -> bool {
        !matches!(self, StageFailure::Validation(_))
    }

    fn terminal_stage(&self) -> ProcessingStage {
        match self {
            StageFailure::Validation(_) => ProcessingStage::ValidationError,
            StageFailure::Timeout(_) => ProcessingStage::TimeoutError,
            StageFailure::Unknown(_) => ProcessingStage::UnknownError,
        }
    }

    fn message(&self) -> &str {
        match self {
            StageFailure::Validation(message)
            | StageFailure::Timeout(message)
            | StageFailure::Unknown(message) => message,
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl From<AppError> for StageFailure {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Timeout(message) => StageFailure::Timeout(message),
            other => StageFailure::Unknown(other.to_string()),
        }
    }
}

pub struct Orchestrator {
    converter: Arc<dyn Converter>,
    chunker: Arc<SemanticChunker>,
    graph: Arc<dyn GraphStore>,
    rate_limiter: Arc<RateLimiter>,
    status: StatusRegistry,
    config: AppConfig,
}

impl Orchestrator {
    pub fn new(
        converter: Arc<dyn Converter>,
        chunker: Arc<SemanticChunker>,
        graph: Arc<dyn GraphStore>,
        rate_limiter: Arc<RateLimiter>,
        status: StatusRegistry,
        config: AppConfig,
    ) -> Self {
        Self {
            converter,
            chunker,
            graph,
            rate_limiter,
            status,
            config,
        }
    }

    pub fn status_registry(&self) -> &StatusRegistry {
        &self.status
    }

    /// `process(upload_id, path, metadata)`. Retries a pipeline-level
    /// failure with exponential backoff (`base_delay * 2^min(attempt-1,
    /// cap)`, capped at `max_delay`) up to `retry.max_attempts` before
    /// dead-lettering as `failed/unknown_error`. Validation failures are
    /// never retried since rerunning against the same file cannot change
    /// their outcome.
    pub async fn process(&self, entry: QueueEntry) -> Result<(), String> {
        let upload_id = entry.upload_id.clone();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.status
                .update(&upload_id, |status| {
                    status.sub_stage = Some(format!("attempt {attempt}"));
                })
                .await;

            match self.process_once(&entry).await {
                Ok(()) => return Ok(()),
                Err(failure) => {
                    let exhausted = !failure.retryable() || attempt >= self.config.retry.max_attempts;
                    if exhausted {
                        let terminal_stage = failure.terminal_stage();
                        let message = failure.to_string();
                        self.status
                            .update(&upload_id, |status| {
                                status.mark_failed(terminal_stage.clone(), message.clone())
                            })
                            .await;
                        error!(%upload_id, attempt, stage = ?terminal_stage, error = %failure, "ingestion task failed permanently");
                        return Err(message);
                    }

                    let exponent = (attempt - 1).min(self.config.retry.backoff_cap_exponent);
                    let delay_ms = self
                        .config
                        .retry
                        .base_delay_ms
                        .saturating_mul(1u64 << exponent)
                        .min(self.config.retry.max_delay_ms);
                    warn!(%upload_id, attempt, delay_ms, error = %failure, "ingestion task failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    async fn process_once(&self, entry: &QueueEntry) -> Result<(), StageFailure> {
        let upload_id: &str = &entry.upload_id;
        let overall_start = Instant::now();

        // Validation (C1)
        self.status
            .update(upload_id, |status| {
                status.enter_stage(ProcessingStage::Validation, ProcessingStage::Validation.progress_floor());
            })
            .await;
        let validation_start = Instant::now();
        validate_upload(std::path::Path::new(&entry.file_path), &self.config)
            .map_err(|err| StageFailure::Validation(err.to_string()))?;
        let validation_secs = validation_start.elapsed().as_secs_f64();
        self.status
            .update(upload_id, |status| status.durations.validation_secs = Some(validation_secs))
            .await;

        // Conversion (C2)
        self.status
            .update(upload_id, |status| {
                status.enter_stage(ProcessingStage::Conversion, ProcessingStage::Conversion.progress_floor());
            })
            .await;
        let conversion_start = Instant::now();
        let timeout = Duration::from_secs(self.config.conversion_timeout_secs);
        let document = self
            .converter
            .convert(&entry.file_path, timeout, Some(upload_id))
            .await?;
        let conversion_secs = conversion_start.elapsed().as_secs_f64();
        self.status
            .update(upload_id, |status| {
                status.metrics.pages = Some(document.pages);
                status.metrics.conversion_duration = Some(conversion_secs);
                status.durations.conversion_secs = Some(conversion_secs);
            })
            .await;

        // Chunking (C3)
        self.status
            .update(upload_id, |status| {
                status.enter_stage(ProcessingStage::Chunking, ProcessingStage::Chunking.progress_floor());
            })
            .await;
        let chunking_start = Instant::now();
        let chunks = self
            .chunker
            .chunk(&document, &entry.filename, upload_id)
            .map_err(|err| StageFailure::Unknown(err.to_string()))?;
        let chunking_secs = chunking_start.elapsed().as_secs_f64();
        let avg_chunk_size = average_chunk_tokens(&chunks);
        self.status
            .update(upload_id, |status| {
                status.metrics.num_chunks = Some(chunks.len() as u32);
                status.metrics.avg_chunk_size = Some(avg_chunk_size);
                status.durations.chunking_secs = Some(chunking_secs);
            })
            .await;

        // Ingestion (C5)
        self.status
            .update(upload_id, |status| {
                status.enter_stage(ProcessingStage::Ingestion, ProcessingStage::Ingestion.progress_floor());
                status.ingestion_progress = Some(IngestionProgress {
                    chunks_total: chunks.len() as u32,
                    ..Default::default()
                });
            })
            .await;
        let ingestion_start = Instant::now();
        let successful = self.ingest_chunks(upload_id, entry, &chunks).await;
        let ingestion_secs = ingestion_start.elapsed().as_secs_f64();

        let (entities, relations) = match self.graph.stats().await {
            Ok(stats) => (
                stats.node_counts_by_label.iter().map(|(_, count)| *count).sum(),
                stats.relationship_counts_by_type.iter().map(|(_, count)| *count).sum(),
            ),
            Err(err) => {
                warn!(%upload_id, error = %err, "failed to read graph stats after ingestion");
                (0u64, 0u64)
            }
        };

        self.status
            .update(upload_id, |status| {
                status.metrics.ingestion_duration = Some(ingestion_secs);
                status.metrics.entities = Some(entities);
                status.metrics.relations = Some(relations);
                status.durations.ingestion_secs = Some(ingestion_secs);
                status.mark_completed();
            })
            .await;

        info!(
            %upload_id,
            successful,
            total = chunks.len(),
            total_secs = overall_start.elapsed().as_secs_f64(),
            "ingestion pipeline completed"
        );
        Ok(())
    }

    /// Sequential per-chunk loop (C5). A chunk failure (including its own
    /// timeout) is recorded and does not abort the pipeline; a wholly failed
    /// ingestion (`successful=0`) still completes as `completed`, with the
    /// zero count visible in metrics for callers to act on.
    async fn ingest_chunks(&self, upload_id: &str, entry: &QueueEntry, chunks: &[Chunk]) -> u32 {
        let total = chunks.len() as u32;
        let mut successful = 0u32;

        for (i, chunk) in chunks.iter().enumerate() {
            let estimated_tokens = self.config.estimated_tokens_per_chunk;
            self.rate_limiter.wait_for_budget(estimated_tokens).await;

            let name = format!("{} - Chunk {}", entry.filename, chunk.index());
            let source_description = format!("upload {}", entry.filename);
            let body = chunk.ingestible_text();

            let outcome = tokio::time::timeout(
                CHUNK_INGEST_TIMEOUT,
                self.graph.add_episode(
                    &name,
                    body,
                    &source_description,
                    Utc::now(),
                    entry.group_id.as_deref(),
                ),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {
                    self.rate_limiter.record(estimated_tokens).await;
                    successful += 1;
                }
                Ok(Err(err)) => {
                    warn!(%upload_id, chunk_index = chunk.index(), error = %err, "chunk ingestion failed");
                }
                Err(_) => {
                    warn!(%upload_id, chunk_index = chunk.index(), timeout_secs = CHUNK_INGEST_TIMEOUT.as_secs(), "chunk ingestion timed out");
                }
            }

            let progress = 75 + (25 * (i as u32 + 1) / total.max(1));
            self.status
                .update(upload_id, |status| {
                    if let Some(ingestion_progress) = status.ingestion_progress.as_mut() {
                        ingestion_progress.chunks_completed = i as u32 + 1;
                        ingestion_progress.current_chunk_index = chunk.index();
                        ingestion_progress.progress_pct = (ingestion_progress.chunks_completed as f32
                            / ingestion_progress.chunks_total.max(1) as f32)
                            * 100.0;
                    }
                    status.set_progress(progress.min(100) as u8);
                })
                .await;
        }

        successful
    }
}

fn average_chunk_tokens(chunks: &[Chunk]) -> f64 {
    if chunks.is_empty() {
        return 0.0;
    }
    let total: f64 = chunks.iter().map(|chunk| f64::from(chunk.metadata.num_tokens)).sum();
    total / chunks.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::domain::{Document, GraphSearchHit, GraphStats, QueryOutcome};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedConverter {
        markdown: &'static str,
    }

    #[async_trait]
    impl Converter for FixedConverter {
        async fn convert(
            &self,
            _path: &str,
            _timeout: Duration,
            _upload_id: Option<&str>,
        ) -> Result<Document, AppError> {
            Ok(Document::new("doc", self.markdown))
        }
    }

    struct FailingConverter;

    #[async_trait]
    impl Converter for FailingConverter {
        async fn convert(
            &self,
            _path: &str,
            _timeout: Duration,
            _upload_id: Option<&str>,
        ) -> Result<Document, AppError> {
            Err(AppError::Processing("parser exploded".into()))
        }
    }

    struct CountingGraph {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl GraphStore for CountingGraph {
        async fn add_episode(
            &self,
            _name: &str,
            _body: &str,
            _source_description: &str,
            _reference_time: chrono::DateTime<Utc>,
            _group_id: Option<&str>,
        ) -> Result<(), AppError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first_n {
                return Err(AppError::Processing("episode rejected".into()));
            }
            Ok(())
        }

        async fn search(
            &self,
            _query: &str,
            _limit: usize,
            _group_ids: Option<&[String]>,
        ) -> Result<Vec<GraphSearchHit>, AppError> {
            Ok(vec![])
        }

        async fn build_communities(&self, _group_id: Option<&str>) -> Result<(), AppError> {
            Ok(())
        }

        async fn stats(&self) -> Result<GraphStats, AppError> {
            Ok(GraphStats::default())
        }

        async fn query(
            &self,
            _raw_query: &str,
            _params: Value,
            _timeout: Duration,
        ) -> Result<QueryOutcome, AppError> {
            Ok(QueryOutcome {
                records: Value::Null,
                summary: String::new(),
            })
        }
    }

    fn orchestrator(converter: Arc<dyn Converter>, graph: Arc<dyn GraphStore>) -> Orchestrator {
        let chunker = Arc::new(
            SemanticChunker::new(common::domain::ChunkingStrategy::Recursive, 200, 20)
                .expect("chunker builds"),
        );
        let rate_limiter = Arc::new(RateLimiter::new(1_000_000, 0.8));
        Orchestrator::new(
            converter,
            chunker,
            graph,
            rate_limiter,
            StatusRegistry::new(),
            AppConfig::default(),
        )
    }

    fn queue_entry(upload_id: &str) -> QueueEntry {
        QueueEntry::new(upload_id, "manual.pdf", "/tmp/does-not-matter.pdf", None)
    }

    #[tokio::test]
    async fn validation_failure_is_not_retried_and_marks_terminal() {
        let orchestrator = orchestrator(
            Arc::new(FixedConverter { markdown: "hello" }),
            Arc::new(CountingGraph {
                calls: AtomicUsize::new(0),
                fail_first_n: 0,
            }),
        );
        orchestrator.status_registry().register("u1").await;

        let entry = queue_entry("u1");
        let result = orchestrator.process(entry).await;

        assert!(result.is_err());
        let status = orchestrator.status_registry().get("u1").await.unwrap();
        assert_eq!(status.stage, ProcessingStage::ValidationError);
        assert_eq!(status.error.as_deref(), Some(result.unwrap_err().as_str()));
    }

    #[tokio::test]
    async fn unknown_conversion_failure_retries_until_exhausted() {
        let mut config = AppConfig::default();
        config.retry.max_attempts = 2;
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 2;

        let chunker = Arc::new(
            SemanticChunker::new(common::domain::ChunkingStrategy::Recursive, 200, 20).unwrap(),
        );
        let orchestrator = Orchestrator::new(
            Arc::new(FailingConverter),
            chunker,
            Arc::new(CountingGraph {
                calls: AtomicUsize::new(0),
                fail_first_n: 0,
            }),
            Arc::new(RateLimiter::new(1_000_000, 0.8)),
            StatusRegistry::new(),
            config,
        );

        // validate_upload will fail first since the path does not exist in
        // this environment too, so point at a real temp file to exercise the
        // conversion-failure path specifically.
        let file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        std::fs::write(file.path(), b"%PDF-1.4 test").unwrap();

        orchestrator.status_registry().register("u2").await;
        let entry = QueueEntry::new(
            "u2",
            "manual.pdf",
            file.path().to_str().unwrap(),
            None,
        );

        let result = orchestrator.process(entry).await;
        assert!(result.is_err());
        let status = orchestrator.status_registry().get("u2").await.unwrap();
        assert_eq!(status.stage, ProcessingStage::UnknownError);
    }

    #[tokio::test]
    async fn wholly_failed_ingestion_still_completes_with_zero_successful() {
        let file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        std::fs::write(file.path(), b"%PDF-1.4 test").unwrap();

        let orchestrator = orchestrator(
            Arc::new(FixedConverter {
                markdown: "# Heading\n\nSome body text for chunking purposes.",
            }),
            Arc::new(CountingGraph {
                calls: AtomicUsize::new(0),
                fail_first_n: usize::MAX,
            }),
        );
        orchestrator.status_registry().register("u3").await;

        let entry = QueueEntry::new("u3", "manual.pdf", file.path().to_str().unwrap(), None);
        let result = orchestrator.process(entry).await;

        assert!(result.is_ok());
        let status = orchestrator.status_registry().get("u3").await.unwrap();
        assert_eq!(status.stage, ProcessingStage::Completed);
        assert_eq!(status.progress, 100);
    }
}
