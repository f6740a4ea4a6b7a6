use axum::{extract::State, response::IntoResponse, Json};
use retrieval_pipeline::rag::RagOrchestrator;
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    pub group_ids: Option<Vec<String>>,
    pub use_reranking: Option<bool>,
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    1000
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub context: Vec<common::domain::Fact>,
    pub num_sources: usize,
    pub reranked: bool,
}

pub(crate) fn validate_request(request: &QueryRequest) -> Result<(), ApiError> {
    if request.question.is_empty() || request.question.len() > 1000 {
        return Err(ApiError::ValidationError(
            "question must be between 1 and 1000 characters".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&request.temperature) {
        return Err(ApiError::ValidationError(
            "temperature must be between 0 and 1".to_string(),
        ));
    }
    if !(100..=4000).contains(&request.max_tokens) {
        return Err(ApiError::ValidationError(
            "max_tokens must be between 100 and 4000".to_string(),
        ));
    }
    Ok(())
}

/// Non-streaming RAG answer: retrieve, optionally rerank, assemble a
/// grounded prompt, and drive the configured LLM to completion.
pub async fn query(
    State(state): State<ApiState>,
    Json(request): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_request(&request)?;
    let use_reranking = request.use_reranking.unwrap_or(state.config.reranking_enabled);

    let lease = if use_reranking {
        match &state.reranker_pool {
            Some(pool) => Some(pool.checkout().await),
            None => None,
        }
    } else {
        None
    };

    let orchestrator = RagOrchestrator {
        graph: state.graph.as_ref(),
        llm: state.llm.as_ref(),
        reranker: lease.as_ref(),
        retrieval_multiplier: state.config.tuning.retrieval_multiplier,
    };

    let answer = orchestrator
        .query(
            &request.question,
            request.temperature,
            request.max_tokens,
            state.config.retrieval_top_k,
            request.group_ids.as_deref(),
            use_reranking,
        )
        .await?;

    Ok(Json(QueryResponse {
        answer: answer.answer,
        context: answer.context,
        num_sources: answer.num_sources,
        reranked: answer.reranked,
    }))
}
