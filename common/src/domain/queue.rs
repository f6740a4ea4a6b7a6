use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// A single upload's slot in the Document Queue's FIFO ordering. The queue
/// owns all transitions on this type exclusively; at most one entry across
/// the whole queue may carry `status=Processing` at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub upload_id: String,
    pub filename: String,
    pub file_path: String,
    pub group_id: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub status: QueueStatus,
    pub queue_position: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl QueueEntry {
    pub fn new(
        upload_id: impl Into<String>,
        filename: impl Into<String>,
        file_path: impl Into<String>,
        group_id: Option<String>,
    ) -> Self {
        Self {
            upload_id: upload_id.into(),
            filename: filename.into(),
            file_path: file_path.into(),
            group_id,
            queued_at: Utc::now(),
            status: QueueStatus::Queued,
            queue_position: 0,
            started_at: None,
            completed_at: None,
            failed_at: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = QueueStatus::Processing;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = QueueStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = QueueStatus::Failed;
        self.failed_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}

const HISTORY_CAPACITY: usize = 50;

/// A snapshot of the Document Queue's state, shaped for the status HTTP
/// endpoint: the entry currently running (if any), the entries still
/// waiting with their positions, and a rolling success rate over the last
/// [`HISTORY_CAPACITY`] completed/failed entries.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub current: Option<QueueEntry>,
    pub queued: Vec<QueueEntry>,
    pub queue_length: usize,
    pub completed_count: u32,
    pub failed_count: u32,
    pub success_rate_pct: f32,
}

struct QueueInner {
    pending: VecDeque<QueueEntry>,
    current: Option<QueueEntry>,
    history: VecDeque<bool>,
}

/// In-process FIFO queue backing the Document Queue (C8): at most one entry
/// is ever `status=processing` at a time, enforced by `start_next` only ever
/// being called from the single drain loop in [`run`](Self::run). Holds no
/// persistence of its own — a process restart drops whatever was queued,
/// per the no-cross-process-coordination non-goal.
pub struct DocumentQueue {
    inner: Mutex<QueueInner>,
    notify: tokio::sync::Notify,
    shutdown: AtomicBool,
}

impl DocumentQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                current: None,
                history: VecDeque::new(),
            }),
            notify: tokio::sync::Notify::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Appends `entry` to the back of the queue and wakes the drain loop.
    /// Returns the entry's 1-based queue position.
    pub async fn enqueue(&self, entry: QueueEntry) -> usize {
        let position = {
            let mut inner = self.inner.lock().await;
            inner.pending.push_back(entry);
            Self::renumber(&mut inner.pending);
            inner.pending.back().map_or(0, |e| e.queue_position)
        };
        self.notify.notify_one();
        position
    }

    /// Pops the oldest pending entry and marks it current. `None` once a
    /// shutdown has been requested or the queue is empty.
    async fn start_next(&self) -> Option<QueueEntry> {
        if self.shutdown.load(Ordering::Acquire) {
            return None;
        }
        let mut inner = self.inner.lock().await;
        let mut entry = inner.pending.pop_front()?;
        entry.start();
        Self::renumber(&mut inner.pending);
        inner.current = Some(entry.clone());
        Some(entry)
    }

    async fn finish_current(&self, outcome: Result<(), String>) {
        let mut inner = self.inner.lock().await;
        let success = outcome.is_ok();
        if let Some(mut entry) = inner.current.take() {
            match outcome {
                Ok(()) => entry.complete(),
                Err(error) => entry.fail(error),
            }
        }
        if inner.history.len() == HISTORY_CAPACITY {
            inner.history.pop_front();
        }
        inner.history.push_back(success);
    }

    /// Signals the drain loop to stop once its current entry (if any)
    /// finishes; remaining queued entries are abandoned.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> QueueSnapshot {
        let inner = self.inner.lock().await;
        let completed_count = u32::try_from(inner.history.iter().filter(|done| **done).count())
            .unwrap_or(u32::MAX);
        let failed_count = u32::try_from(inner.history.len()).unwrap_or(u32::MAX) - completed_count;
        let success_rate_pct = if inner.history.is_empty() {
            100.0
        } else {
            (f64::from(completed_count) / inner.history.len() as f64 * 100.0) as f32
        };

        QueueSnapshot {
            current: inner.current.clone(),
            queued: inner.pending.iter().cloned().collect(),
            queue_length: inner.pending.len(),
            completed_count,
            failed_count,
            success_rate_pct,
        }
    }

    fn renumber(pending: &mut VecDeque<QueueEntry>) {
        for (i, entry) in pending.iter_mut().enumerate() {
            entry.queue_position = i + 1;
        }
    }
}

impl Default for DocumentQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains `queue` one entry at a time, handing each to `process`, pausing
/// `inter_document_delay` between entries (skipped when nothing is waiting
/// next), until [`DocumentQueue::request_shutdown`] is called. Intended to
/// run as a single long-lived `tokio::task` per process — the Orchestrator
/// is invoked through `process`, kept generic here so this module stays free
/// of a dependency on the ingestion pipeline.
pub async fn run<F, Fut>(
    queue: std::sync::Arc<DocumentQueue>,
    inter_document_delay: std::time::Duration,
    mut process: F,
) where
    F: FnMut(QueueEntry) -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    loop {
        match queue.start_next().await {
            Some(entry) => {
                let outcome = process(entry).await;
                queue.finish_current(outcome).await;

                let still_queued = {
                    let inner = queue.inner.lock().await;
                    !inner.pending.is_empty()
                };
                if still_queued && !queue.is_shutting_down() {
                    tokio::time::sleep(inter_document_delay).await;
                }
            }
            None => {
                if queue.is_shutting_down() {
                    return;
                }
                queue.notify.notified().await;
            }
        }
    }
}
