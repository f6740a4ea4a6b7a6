use std::sync::Arc;

use common::{
    domain::{DocumentQueue, GraphStore, Llm, StatusRegistry},
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::config::AppConfig,
};
use retrieval_pipeline::{management::ManagementSurface, reranking::RerankerPool};

/// Shared application state handed to every route. Construction (DB
/// connection, migrations, singleton wiring) lives in the binary that
/// assembles this crate's dependencies; this type just carries the `Arc`s.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub status: StatusRegistry,
    pub queue: Arc<DocumentQueue>,
    pub graph: Arc<dyn GraphStore>,
    pub llm: Arc<dyn Llm>,
    pub reranker_pool: Option<Arc<RerankerPool>>,
    pub management: Arc<ManagementSurface>,
}

impl ApiState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        storage: StorageManager,
        status: StatusRegistry,
        queue: Arc<DocumentQueue>,
        graph: Arc<dyn GraphStore>,
        llm: Arc<dyn Llm>,
        reranker_pool: Option<Arc<RerankerPool>>,
        management: Arc<ManagementSurface>,
    ) -> Self {
        Self {
            db,
            config,
            storage,
            status,
            queue,
            graph,
            llm,
            reranker_pool,
            management,
        }
    }
}
