use chrono::{DateTime, Utc};

use crate::domain::Fact;
use crate::storage::types::file_info::deserialize_flexible_id;
use crate::{error::AppError, storage::db::SurrealDbClient};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RelationshipMetadata {
    pub user_id: String,
    pub source_id: String,
    pub relationship_type: String,
    /// Natural-language statement this edge asserts, used verbatim as the
    /// `Fact::fact` text surfaced to the RAG path.
    #[serde(default)]
    pub fact: String,
    /// When this edge became true. Defaults to creation time for edges
    /// ingested without an explicit reference time.
    #[serde(default = "Utc::now")]
    pub valid_at: DateTime<Utc>,
    /// When this edge stopped being true, if it has been superseded.
    #[serde(default)]
    pub invalid_at: Option<DateTime<Utc>>,
    /// Ids of the episodes (ingested chunks) that contributed this edge.
    #[serde(default)]
    pub episodes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KnowledgeRelationship {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    #[serde(rename = "in", deserialize_with = "deserialize_flexible_id")]
    pub in_: String,
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub out: String,
    pub metadata: RelationshipMetadata,
}

impl KnowledgeRelationship {
    pub fn new(
        in_: String,
        out: String,
        user_id: String,
        source_id: String,
        relationship_type: String,
    ) -> Self {
        Self::new_episodic(in_, out, user_id, source_id, relationship_type, String::new(), Vec::new())
    }

    /// Constructs a relationship carrying the fact text and episode
    /// provenance the Ingestion Engine records when it ingests a chunk as
    /// an episode.
    pub fn new_episodic(
        in_: String,
        out: String,
        user_id: String,
        source_id: String,
        relationship_type: String,
        fact: String,
        episodes: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            in_,
            out,
            metadata: RelationshipMetadata {
                user_id,
                source_id,
                relationship_type,
                fact,
                valid_at: Utc::now(),
                invalid_at: None,
                episodes,
            },
        }
    }

    /// Projects this graph edge into the read-only shape handed to the RAG
    /// path. `source_entity`/`target_entity` are the resolved entity names,
    /// looked up by the caller since this type only carries entity ids.
    pub fn to_fact(&self, source_entity: String, target_entity: String) -> Fact {
        Fact {
            fact: self.metadata.fact.clone(),
            source_entity,
            target_entity,
            relation_type: self.metadata.relationship_type.clone(),
            valid_at: self.metadata.valid_at,
            invalid_at: self.metadata.invalid_at,
            episodes: self.metadata.episodes.clone(),
        }
    }

    pub async fn store_relationship(&self, db_client: &SurrealDbClient) -> Result<(), AppError> {
        db_client
            .client
            .query(
                r#"BEGIN TRANSACTION;
                LET $in_entity = type::thing('knowledge_entity', $in_id);
                LET $out_entity = type::thing('knowledge_entity', $out_id);
                LET $relation = type::thing('relates_to', $rel_id);
                DELETE type::thing('relates_to', $rel_id);
                RELATE $in_entity->$relation->$out_entity SET
                    metadata.user_id = $user_id,
                    metadata.source_id = $source_id,
                    metadata.relationship_type = $relationship_type,
                    metadata.fact = $fact,
                    metadata.valid_at = $valid_at,
                    metadata.invalid_at = $invalid_at,
                    metadata.episodes = $episodes;
                COMMIT TRANSACTION;"#,
            )
            .bind(("rel_id", self.id.clone()))
            .bind(("in_id", self.in_.clone()))
            .bind(("out_id", self.out.clone()))
            .bind(("user_id", self.metadata.user_id.clone()))
            .bind(("source_id", self.metadata.source_id.clone()))
            .bind(("relationship_type", self.metadata.relationship_type.clone()))
            .bind(("fact", self.metadata.fact.clone()))
            .bind(("valid_at", self.metadata.valid_at))
            .bind(("invalid_at", self.metadata.invalid_at))
            .bind(("episodes", self.metadata.episodes.clone()))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn delete_relationships_by_source_id(
        source_id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db_client
            .client
            .query("DELETE FROM relates_to WHERE metadata.source_id = $source_id")
            .bind(("source_id", source_id.to_owned()))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn delete_relationship_by_id(
        id: &str,
        user_id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut authorized_result = db_client
            .client
            .query(
                "SELECT * FROM relates_to WHERE id = type::thing('relates_to', $id) AND metadata.user_id = $user_id",
            )
            .bind(("id", id.to_owned()))
            .bind(("user_id", user_id.to_owned()))
            .await?;
        let authorized: Vec<KnowledgeRelationship> = authorized_result.take(0).unwrap_or_default();

        if authorized.is_empty() {
            let mut exists_result = db_client
                .client
                .query("SELECT * FROM type::thing('relates_to', $id)")
                .bind(("id", id.to_owned()))
                .await?;
            let existing: Option<KnowledgeRelationship> = exists_result.take(0)?;

            if existing.is_some() {
                Err(AppError::Auth(
                    "Not authorized to delete relationship".into(),
                ))
            } else {
                Err(AppError::NotFound(format!("Relationship {id} not found")))
            }
        } else {
            db_client
                .client
                .query("DELETE type::thing('relates_to', $id)")
                .bind(("id", id.to_owned()))
                .await?
                .check()?;
            Ok(())
        }
    }
}
