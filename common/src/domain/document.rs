use serde::{Deserialize, Serialize};

/// Structured output of the Converter Adapter. The core treats this as
/// opaque beyond the counts used for metrics and the markdown export handed
/// to the chunker; a production layout parser would populate `pages`,
/// `tables`, and `pictures` from the real document tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub markdown: String,
    pub pages: u32,
    pub tables: u32,
    pub pictures: u32,
}

impl Document {
    pub fn new(name: impl Into<String>, markdown: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            markdown: markdown.into(),
            pages: 0,
            tables: 0,
            pictures: 0,
        }
    }
}

/// Which chunker strategy produced a `Chunk`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Size-bounded recursive splitter over the markdown export.
    Recursive,
    /// Structure-aware chunker that respects headings/tables and attaches
    /// ancestor-heading context.
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub filename: String,
    pub upload_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub num_tokens: u32,
    pub chunking_strategy: ChunkingStrategy,
    pub has_context: bool,
}

/// A slice of a converted document ready for embedding and ingestion.
///
/// `contextualized_text` is `text` prefixed with the joined ancestor
/// headings (for the hybrid strategy) or identical to `text` (for the
/// recursive strategy, which has no heading context to attach). It is the
/// field used for embedding and graph ingestion; `text` is preserved
/// unmodified for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub contextualized_text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn index(&self) -> u32 {
        self.metadata.chunk_index
    }

    /// Text handed to the embedder and to `GraphStore::add_episode`.
    pub fn ingestible_text(&self) -> &str {
        if self.contextualized_text.is_empty() {
            &self.text
        } else {
            &self.contextualized_text
        }
    }
}
