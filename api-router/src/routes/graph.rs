use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::{api_state::ApiState, error::ApiError};

const DOCUMENT_SUBGRAPH_CAP: usize = 100;
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Episode/entity/relationship counts, read directly off the graph store.
pub async fn stats(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.graph.stats().await?;
    Ok(Json(json!({
        "entities": stats.node_counts_by_label,
        "relations": stats.relationship_counts_by_type,
    })))
}

/// Detailed graph stats by label/type plus the set of indexes present.
pub async fn stats_detail(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.graph.stats().await?;
    Ok(Json(stats))
}

/// Subgraph for a document's episodes, capped at [`DOCUMENT_SUBGRAPH_CAP`]
/// triples.
pub async fn document(
    State(state): State<ApiState>,
    Path(doc_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .graph
        .query(
            "SELECT * FROM relates_to WHERE $doc_id IN metadata.episodes LIMIT $limit;",
            json!({ "doc_id": doc_id, "limit": DOCUMENT_SUBGRAPH_CAP }),
            QUERY_TIMEOUT,
        )
        .await?;

    Ok(Json(json!({
        "doc_id": doc_id,
        "triples": outcome.records,
    })))
}

#[derive(Debug, Serialize)]
struct BuildCommunitiesResponse {
    status: &'static str,
}

/// Fire-and-forget community-detection job: reports `started` immediately
/// and runs the actual build on a detached task.
pub async fn build_communities(
    State(state): State<ApiState>,
) -> Result<impl IntoResponse, ApiError> {
    let graph = state.graph.clone();
    tokio::spawn(async move {
        if let Err(err) = graph.build_communities(None).await {
            tracing::error!(error = %err, "community detection failed");
        }
    });

    Ok(Json(BuildCommunitiesResponse { status: "started" }))
}

#[derive(Debug, Deserialize)]
pub struct GraphQueryRequest {
    pub query: String,
    #[serde(default = "default_params")]
    pub params: Value,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_params() -> Value {
    Value::Null
}

fn default_timeout_secs() -> u64 {
    30
}

/// Arbitrary read/write query against the graph store. Left unauthenticated
/// like the rest of this surface; operator-only access is an external
/// collaborator's concern, not this crate's.
pub async fn query(
    State(state): State<ApiState>,
    Json(request): Json<GraphQueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .graph
        .query(
            &request.query,
            request.params,
            Duration::from_secs(request.timeout_secs),
        )
        .await?;

    Ok(Json(outcome))
}
