//! Core shapes shared between the ingestion and retrieval pipelines: the
//! upload/status/metrics bookkeeping the orchestrator owns, the
//! document/chunk shapes that flow between the converter and the chunker,
//! the queue entry the Document Queue transitions, the fact projection the
//! RAG path reads, and the trait seams (`Converter`, `Embedder`, `Llm`,
//! `GraphStore`) behind which the real external collaborators live.

mod document;
mod fact;
mod queue;
mod status;
mod token_window;
mod traits;
mod upload;

pub use document::{Chunk, ChunkMetadata, ChunkingStrategy, Document};
pub use fact::Fact;
pub use queue::{run as run_document_queue, DocumentQueue, QueueEntry, QueueSnapshot, QueueStatus};
pub use status::{
    IngestionProgress, Metrics, ProcessingStage, ProcessingStatus, ProgressDetail, StageDurations,
    StatusRegistry, UploadStatus,
};
pub use token_window::TokenWindow;
pub use traits::{
    Converter, Embedder, GraphSearchHit, GraphStats, GraphStore, Llm, LlmMessage, QueryOutcome,
};
pub use upload::Upload;
