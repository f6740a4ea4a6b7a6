use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{delete, get, post},
    Router,
};
use routes::{
    clear::clear,
    export::export,
    graph::{build_communities, document, query as graph_query, stats, stats_detail},
    health::health,
    liveness::live,
    logs::get_logs,
    query::query,
    query_stream::query_stream,
    readiness::ready,
    status::get_status,
    upload::upload,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for the API surface, version 1. Authentication is an external
/// collaborator's concern, not this crate's — every route here is public.
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    let upload_body_limit = DefaultBodyLimit::max(
        usize::try_from(app_state.config.max_upload_mb.saturating_mul(1024 * 1024))
            .unwrap_or(usize::MAX),
    );

    Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/api/upload", post(upload).layer(upload_body_limit))
        .route("/api/upload/{id}/status", get(get_status))
        .route("/api/upload/{id}/logs", get(get_logs))
        .route("/api/query", post(query))
        .route("/api/query/stream", post(query_stream))
        .route("/api/graph/stats", get(stats))
        .route("/api/graph/stats/detail", get(stats_detail))
        .route("/api/graph/document/{doc_id}", get(document))
        .route("/api/graph/build-communities", post(build_communities))
        .route("/api/graph/query", post(graph_query))
        .route("/api/graph/export", post(export))
        .route("/api/graph/clear", delete(clear))
        .route("/api/health", get(health))
}
