use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use retrieval_pipeline::rag::RagOrchestrator;

use super::query::QueryRequest;
use crate::{api_state::ApiState, error::ApiError};

fn sse_line(payload: &str) -> String {
    format!("data: {payload}\n\n")
}

/// Streaming RAG answer as Server-Sent Events: one `data: <token>` line per
/// token, a terminal `data: [DONE]`, or `data: [ERROR: ...]` if the LLM
/// stream fails mid-flight.
pub async fn query_stream(
    State(state): State<ApiState>,
    Json(request): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    super::query::validate_request(&request)?;
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

    let token_stream = orchestrator
        .stream(
            &request.question,
            request.temperature,
            request.max_tokens,
            state.config.retrieval_top_k,
            request.group_ids.as_deref(),
            use_reranking,
        )
        .await?;

    // Reranking happens during retrieval, before the token stream starts;
    // the lease is no longer needed once `stream()` above has resolved.
    drop(lease);

    let body_stream = token_stream.map(|chunk| {
        let line = match chunk {
            Ok(token) => sse_line(&token),
            Err(err) => sse_line(&format!("[ERROR: {err}]")),
        };
        Ok::<_, std::convert::Infallible>(Bytes::from(line))
    });
    let done = futures::stream::once(async { Ok::<_, std::convert::Infallible>(Bytes::from(sse_line("[DONE]"))) });

    let body = Body::from_stream(body_stream.chain(done));

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|err| ApiError::InternalError(err.to_string()))
}
