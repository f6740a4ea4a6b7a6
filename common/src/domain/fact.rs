use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only projection of a graph edge surfaced to the RAG path. Produced
/// by `GraphStore::search` and, for the graph's own storage, backed by
/// `KnowledgeRelationship::to_fact`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub fact: String,
    pub source_entity: String,
    pub target_entity: String,
    pub relation_type: String,
    pub valid_at: DateTime<Utc>,
    pub invalid_at: Option<DateTime<Utc>>,
    pub episodes: Vec<String>,
}

impl Fact {
    pub fn is_valid_range(&self) -> bool {
        match self.invalid_at {
            Some(invalid_at) => self.valid_at < invalid_at,
            None => true,
        }
    }
}
