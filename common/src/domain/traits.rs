use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;

use crate::error::AppError;

use super::document::Document;
use super::fact::Fact;

/// Turns a file on disk into a structured `Document`. The real parser
/// (layout-aware PDF/office-document extraction) is an external
/// collaborator; this seam is what lets it be swapped in without touching
/// the rest of the pipeline.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(
        &self,
        path: &str,
        timeout: std::time::Duration,
        upload_id: Option<&str>,
    ) -> Result<Document, AppError>;
}

/// Produces embedding vectors for a batch of texts.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError>;
    fn dimension(&self) -> usize;
}

/// One turn of an LLM chat exchange, used to build the RAG Orchestrator's
/// prompt.
#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: &'static str,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Chat-completion access for the RAG Orchestrator, abstracted so the
/// streaming and non-streaming paths can share a fake in tests.
#[async_trait]
pub trait Llm: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<LlmMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, AppError>;

    /// Streams completion tokens as they arrive. The HTTP adapter is
    /// responsible for framing these as SSE; this seam only promises an
    /// ordered sequence of text deltas terminated by the stream's end.
    async fn stream(
        &self,
        messages: Vec<LlmMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<BoxStream<'static, Result<String, AppError>>, AppError>;
}

/// One candidate returned by `GraphStore::search`, before reranking.
#[derive(Debug, Clone)]
pub struct GraphSearchHit {
    pub fact: Fact,
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStats {
    pub node_counts_by_label: Vec<(String, u64)>,
    pub relationship_counts_by_type: Vec<(String, u64)>,
    pub indexes: Vec<String>,
    pub server_version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub records: Value,
    pub summary: String,
}

/// Abstraction over the knowledge-graph library and its underlying store.
/// `add_episode`/`search`/`build_communities` are the three operations the
/// Ingestion Engine and Retrieval Engine actually call; `stats`/`query` back
/// the Index & Stats Service and Management Surface. The concrete
/// implementation adapts this onto entities and relationships held in
/// SurrealDB.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn add_episode(
        &self,
        name: &str,
        body: &str,
        source_description: &str,
        reference_time: DateTime<Utc>,
        group_id: Option<&str>,
    ) -> Result<(), AppError>;

    async fn search(
        &self,
        query: &str,
        limit: usize,
        group_ids: Option<&[String]>,
    ) -> Result<Vec<GraphSearchHit>, AppError>;

    /// Fire-and-forget community detection; callers do not await completion
    /// of the underlying computation beyond the `started` acknowledgement.
    async fn build_communities(&self, group_id: Option<&str>) -> Result<(), AppError>;

    async fn stats(&self) -> Result<GraphStats, AppError>;

    async fn query(
        &self,
        raw_query: &str,
        params: Value,
        timeout: std::time::Duration,
    ) -> Result<QueryOutcome, AppError>;
}
