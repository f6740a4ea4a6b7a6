use std::{sync::Arc, time::Duration};

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    domain::{ChunkingStrategy, DocumentQueue, GraphStore, Llm, StatusRegistry},
    storage::{db::SurrealDbClient, indexes::ensure_runtime_indexes, store::StorageManager, types::system_settings::SystemSettings},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{
    chunking::SemanticChunker,
    graph_store::SurrealGraphStore,
    orchestrator::Orchestrator,
    rate_limiter::RateLimiter,
    utils::file_text_extraction::LocalConverter,
};
use retrieval_pipeline::{llm::OpenAiLlm, management::ManagementSurface, reranking::RerankerPool};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Target token size and overlap handed to the semantic chunker. `AppConfig`
/// has no dedicated chunk-sizing knobs; these mirror the teacher's old
/// task-based pipeline defaults.
const CHUNK_TARGET_TOKENS: usize = 1000;
const CHUNK_OVERLAP_TOKENS: usize = 100;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.apply_migrations().await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider =
        Arc::new(EmbeddingProvider::from_config(&config, Some(openai_client.clone())).await?);
    info!(
        embedding_backend = ?config.embedding_backend,
        embedding_dimension = embedding_provider.dimension(),
        "embedding provider initialized"
    );

    let (settings, _dimensions_changed) =
        SystemSettings::sync_from_embedding_provider(&db, &embedding_provider).await?;

    ensure_runtime_indexes(&db, settings.embedding_dimensions as usize).await?;

    let reranker_pool = RerankerPool::maybe_from_config(&config)?;
    let storage = StorageManager::new(&config).await?;

    let graph: Arc<dyn GraphStore> = Arc::new(SurrealGraphStore::new(
        db.clone(),
        openai_client.clone(),
        embedding_provider.clone(),
        config.rate_limit_tokens_per_min,
        f64::from(config.safety_buffer_pct),
    ));

    let llm: Arc<dyn Llm> = Arc::new(OpenAiLlm::new(openai_client.clone(), settings.query_model.clone()));

    let converter = Arc::new(LocalConverter::new((*openai_client).clone(), config.clone()));
    let chunker = Arc::new(SemanticChunker::new(
        ChunkingStrategy::Recursive,
        CHUNK_TARGET_TOKENS,
        CHUNK_OVERLAP_TOKENS,
    )?);
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_tokens_per_min, f64::from(config.safety_buffer_pct)));

    let status = StatusRegistry::new();
    let queue = Arc::new(DocumentQueue::new());

    let orchestrator = Arc::new(Orchestrator::new(
        converter,
        chunker,
        graph.clone(),
        rate_limiter,
        status.clone(),
        config.clone(),
    ));

    let queue_for_loop = queue.clone();
    let inter_document_delay = Duration::from_millis(config.inter_document_delay_ms);
    tokio::spawn(async move {
        common::domain::run_document_queue(queue_for_loop, inter_document_delay, move |entry| {
            let orchestrator = orchestrator.clone();
            async move { orchestrator.process(entry).await }
        })
        .await;
    });

    let management = Arc::new(ManagementSurface::new(db.clone(), storage.clone()));

    let api_state = ApiState::new(
        db,
        config.clone(),
        storage,
        status,
        queue,
        graph,
        llm,
        reranker_pool,
        management,
    );

    let app: Router = api_routes_v1(&api_state).with_state(api_state);

    info!("starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    if let Err(err) = axum::serve(listener, app).await {
        error!("server error: {}", err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use common::{
        domain::{DocumentQueue, StatusRegistry},
        storage::{store::StorageManager, types::system_settings::SystemSettings},
        utils::config::{AppConfig, PdfIngestMode, StorageKind},
    };
    use ingestion_pipeline::{
        chunking::SemanticChunker,
        graph_store::SurrealGraphStore,
        orchestrator::Orchestrator,
        rate_limiter::RateLimiter,
        utils::file_text_extraction::LocalConverter,
    };
    use retrieval_pipeline::{llm::OpenAiLlm, management::ManagementSurface};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;

    fn smoke_test_config(namespace: &str, database: &str, data_dir: &Path) -> AppConfig {
        AppConfig {
            openai_api_key: "test-key".into(),
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: namespace.into(),
            surrealdb_database: database.into(),
            data_dir: data_dir.to_string_lossy().into_owned(),
            http_port: 0,
            openai_base_url: "https://example.com".into(),
            storage: StorageKind::Local,
            pdf_ingest_mode: PdfIngestMode::LlmFirst,
            ..Default::default()
        }
    }

    async fn build_test_app() -> (Router, std::path::PathBuf) {
        let namespace = "test_ns";
        let database = format!("test_db_{}", Uuid::new_v4());
        let data_dir = std::env::temp_dir().join(format!("crate_smoke_{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&data_dir).await.expect("data dir");

        let config = smoke_test_config(namespace, &database, &data_dir);
        let db = Arc::new(
            SurrealDbClient::memory(namespace, &database)
                .await
                .expect("in-memory surrealdb"),
        );
        db.apply_migrations().await.expect("migrations");

        let openai_client = Arc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        ));
        let embedding_provider = Arc::new(
            EmbeddingProvider::new_hashed(384).expect("hashed embedding provider"),
        );
        let (settings, _) = SystemSettings::sync_from_embedding_provider(&db, &embedding_provider)
            .await
            .expect("sync settings");

        let storage = StorageManager::new(&config).await.expect("storage manager");

        let graph: Arc<dyn GraphStore> = Arc::new(SurrealGraphStore::new(
            db.clone(),
            openai_client.clone(),
            embedding_provider,
            config.rate_limit_tokens_per_min,
            f64::from(config.safety_buffer_pct),
        ));
        let llm: Arc<dyn Llm> = Arc::new(OpenAiLlm::new(openai_client.clone(), settings.query_model.clone()));
        let converter = Arc::new(LocalConverter::new((*openai_client).clone(), config.clone()));
        let chunker = Arc::new(
            SemanticChunker::new(ChunkingStrategy::Recursive, CHUNK_TARGET_TOKENS, CHUNK_OVERLAP_TOKENS)
                .expect("chunker"),
        );
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_tokens_per_min, f64::from(config.safety_buffer_pct)));
        let status = StatusRegistry::new();
        let queue = Arc::new(DocumentQueue::new());
        let _orchestrator = Orchestrator::new(converter, chunker, graph.clone(), rate_limiter, status.clone(), config.clone());
        let management = Arc::new(ManagementSurface::new(db.clone(), storage.clone()));

        let api_state = ApiState::new(db, config, storage, status, queue, graph, llm, None, management);
        let app = api_routes_v1(&api_state).with_state(api_state);

        (app, data_dir)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn smoke_startup_with_in_memory_surrealdb() {
        let (app, data_dir) = build_test_app().await;

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/live").body(Body::empty()).expect("request"))
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);

        let ready_response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("ready response");
        assert_eq!(ready_response.status(), StatusCode::OK);

        tokio::fs::remove_dir_all(&data_dir).await.ok();
    }
}
