use std::collections::HashMap;
use std::sync::Arc;

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    domain::{GraphSearchHit, GraphStats, GraphStore, QueryOutcome},
    error::AppError,
    storage::{
        db::SurrealDbClient,
        indexes::all_index_names,
        types::{
            knowledge_entity::KnowledgeEntity, knowledge_relationship::KnowledgeRelationship,
            system_settings::SystemSettings,
        },
    },
    utils::embedding::EmbeddingProvider,
};
use serde::Deserialize;
use serde_json::Value;
use surrealdb::sql::Thing;
use tracing::warn;

use crate::chunking::estimate_tokens;
use crate::pipeline::LLMEnrichmentResult;
use crate::rate_limiter::RateLimiter;
use crate::utils::llm_instructions::{get_ingress_analysis_schema, INGRESS_ANALYSIS_SYSTEM_MESSAGE};

const DEFAULT_GROUP_ID: &str = "default";
const ENTITY_CONCURRENCY: usize = 4;

/// `GraphStore` over SurrealDB: episodes are analyzed by an LLM into
/// entities and relationships, embedded, and persisted as `knowledge_entity`
/// rows and `relates_to` edges. `group_id` is passed straight through onto
/// the existing `user_id` scoping every other storage type already uses.
pub struct SurrealGraphStore {
    db: Arc<SurrealDbClient>,
    openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    embedding_provider: Arc<EmbeddingProvider>,
    rate_limiter: RateLimiter,
}

impl SurrealGraphStore {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        embedding_provider: Arc<EmbeddingProvider>,
        rate_limit_tokens_per_min: u64,
        safety_buffer_pct: f64,
    ) -> Self {
        Self {
            db,
            openai_client,
            embedding_provider,
            rate_limiter: RateLimiter::new(rate_limit_tokens_per_min, safety_buffer_pct),
        }
    }

    async fn analyze_episode(
        &self,
        body: &str,
        source_description: &str,
    ) -> Result<LLMEnrichmentResult, AppError> {
        let settings = SystemSettings::get_current(&self.db).await?;

        let user_message =
            format!("Source:\n{source_description}\nContent:\n{body}\nExisting KnowledgeEntities in database:\n[]");

        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Structured analysis of an ingested episode".into()),
                name: "content_analysis".into(),
                schema: Some(get_ingress_analysis_schema()),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&settings.processing_model)
            .messages([
                ChatCompletionRequestSystemMessage::from(INGRESS_ANALYSIS_SYSTEM_MESSAGE).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .response_format(response_format)
            .build()?;

        let estimated_tokens = u64::from(estimate_tokens(body));
        self.rate_limiter.wait_for_budget(estimated_tokens).await;

        let response = self.openai_client.chat().create(request).await?;

        let actual_tokens = response
            .usage
            .as_ref()
            .map_or(estimated_tokens, |usage| u64::from(usage.prompt_tokens));
        self.rate_limiter.record(actual_tokens).await;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or(AppError::LLMParsing(
                "No content found in LLM response".into(),
            ))?;

        serde_json::from_str::<LLMEnrichmentResult>(content).map_err(|e| {
            AppError::LLMParsing(format!("Failed to parse LLM response into analysis: {e}"))
        })
    }
}

#[async_trait]
impl GraphStore for SurrealGraphStore {
    async fn add_episode(
        &self,
        name: &str,
        body: &str,
        source_description: &str,
        reference_time: DateTime<Utc>,
        group_id: Option<&str>,
    ) -> Result<(), AppError> {
        let user_id = group_id.unwrap_or(DEFAULT_GROUP_ID);

        let analysis = self.analyze_episode(body, source_description).await?;
        let (embedded_entities, mut relationships) = analysis
            .to_database_entities(name, user_id, ENTITY_CONCURRENCY, &self.embedding_provider)
            .await?;

        let names_by_id: HashMap<&str, &str> = embedded_entities
            .iter()
            .map(|e| (e.entity.id.as_str(), e.entity.name.as_str()))
            .collect();

        for relationship in &mut relationships {
            let source_name = names_by_id
                .get(relationship.in_.as_str())
                .copied()
                .unwrap_or(relationship.in_.as_str());
            let target_name = names_by_id
                .get(relationship.out.as_str())
                .copied()
                .unwrap_or(relationship.out.as_str());
            relationship.metadata.fact = format!(
                "{source_name} {relation} {target_name}",
                relation = relationship.metadata.relationship_type
            );
            relationship.metadata.valid_at = reference_time;
            relationship.metadata.episodes = vec![name.to_string()];
        }

        for embedded in embedded_entities {
            KnowledgeEntity::store_with_embedding(embedded.entity, embedded.embedding, &self.db)
                .await?;
        }
        for relationship in relationships {
            relationship.store_relationship(&self.db).await?;
        }

        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        group_ids: Option<&[String]>,
    ) -> Result<Vec<GraphSearchHit>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            #[serde(flatten)]
            relationship: KnowledgeRelationship,
            score: f32,
        }

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let group_filter = match group_ids {
            Some(ids) if !ids.is_empty() => "AND metadata.user_id IN $group_ids",
            _ => "",
        };

        let sql = format!(
            r#"
            SELECT *,
                IF search::score(0) != NONE THEN search::score(0) ELSE 0 END AS score
            FROM relates_to
            WHERE metadata.fact @0@ $query
              {group_filter}
            ORDER BY score DESC
            LIMIT $limit;
            "#
        );

        let mut response = self
            .db
            .query(&sql)
            .bind(("query", query.to_owned()))
            .bind((
                "group_ids",
                group_ids.map(<[String]>::to_vec).unwrap_or_default(),
            ))
            .bind(("limit", limit_i64))
            .await
            .map_err(|e| AppError::InternalError(format!("graph search query failed: {e}")))?;

        let rows: Vec<Row> = response.take(0).map_err(AppError::Database)?;
        let mut entity_ids: Vec<String> = Vec::new();
        for row in &rows {
            entity_ids.push(row.relationship.in_.clone());
            entity_ids.push(row.relationship.out.clone());
        }
        entity_ids.sort();
        entity_ids.dedup();

        let entities: Vec<KnowledgeEntity> = if entity_ids.is_empty() {
            Vec::new()
        } else {
            let things: Vec<Thing> = entity_ids
                .iter()
                .map(|id| Thing::from(("knowledge_entity", id.as_str())))
                .collect();
            let mut entity_response = self
                .db
                .query("SELECT * FROM type::table('knowledge_entity') WHERE id IN $things")
                .bind(("things", things))
                .await
                .map_err(AppError::Database)?;
            entity_response.take(0).map_err(AppError::Database)?
        };
        let names_by_id: HashMap<&str, &str> = entities
            .iter()
            .map(|e| (e.id.as_str(), e.name.as_str()))
            .collect();

        Ok(rows
            .into_iter()
            .map(|row| {
                let source_entity = names_by_id
                    .get(row.relationship.in_.as_str())
                    .map(|s| (*s).to_string())
                    .unwrap_or_else(|| row.relationship.in_.clone());
                let target_entity = names_by_id
                    .get(row.relationship.out.as_str())
                    .map(|s| (*s).to_string())
                    .unwrap_or_else(|| row.relationship.out.clone());
                GraphSearchHit {
                    fact: row.relationship.to_fact(source_entity, target_entity),
                    score: row.score,
                }
            })
            .collect())
    }

    async fn build_communities(&self, group_id: Option<&str>) -> Result<(), AppError> {
        warn!(
            group_id = group_id.unwrap_or(DEFAULT_GROUP_ID),
            "community detection is not implemented; this store surfaces individual facts only"
        );
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            count: u64,
        }

        async fn count(db: &SurrealDbClient, table: &str) -> Result<u64, AppError> {
            let mut response = db
                .query(format!("SELECT count() AS count FROM {table} GROUP ALL;"))
                .await
                .map_err(AppError::Database)?;
            let rows: Vec<CountRow> = response.take(0).unwrap_or_default();
            Ok(rows.first().map_or(0, |r| r.count))
        }

        let entity_count = count(&self.db, "knowledge_entity").await?;
        let relationship_count = count(&self.db, "relates_to").await?;

        Ok(GraphStats {
            node_counts_by_label: vec![("knowledge_entity".to_string(), entity_count)],
            relationship_counts_by_type: vec![("relates_to".to_string(), relationship_count)],
            indexes: all_index_names()
                .into_iter()
                .map(ToString::to_string)
                .collect(),
            server_version: "surrealdb".to_string(),
        })
    }

    async fn query(
        &self,
        raw_query: &str,
        params: Value,
        timeout: std::time::Duration,
    ) -> Result<QueryOutcome, AppError> {
        let response = tokio::time::timeout(timeout, async {
            self.db.query(raw_query).bind(params).await
        })
        .await
        .map_err(|_| AppError::Timeout(format!("graph query exceeded {timeout:?}")))?
        .map_err(AppError::Database)?;

        let records: Value = response
            .check()
            .map_err(AppError::Database)?
            .take(0)
            .unwrap_or(Value::Null);

        Ok(QueryOutcome {
            records,
            summary: "query executed".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_group_id_is_used_when_none_given() {
        assert_eq!(DEFAULT_GROUP_ID, "default");
    }
}
