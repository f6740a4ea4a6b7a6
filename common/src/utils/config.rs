use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Object storage backend selection for uploads, exports, and other blobs.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

/// How the Converter Adapter turns a PDF into text: a fast local extraction
/// pass only, or a fallback to page-screenshot vision-LLM extraction when the
/// fast pass looks unreliable.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PdfIngestMode {
    Classic,
    LlmFirst,
}

fn default_pdf_ingest_mode() -> PdfIngestMode {
    PdfIngestMode::LlmFirst
}

/// Which embedder backs `EmbeddingProvider`: OpenAI's hosted embeddings API,
/// a locally loaded fastembed model, or a deterministic hashed embedding used
/// in tests and offline smoke runs.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    OpenAi,
    FastEmbed,
    Hashed,
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::FastEmbed
}

/// Which signals the Retrieval Engine combines when answering a question.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchTarget {
    Chunks,
    Entities,
    Both,
}

fn default_search_target() -> SearchTarget {
    SearchTarget::Both
}

/// Tunable weights handed to the retrieval fusion stage.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct RetrievalTuning {
    #[serde(default = "default_retrieval_multiplier")]
    pub retrieval_multiplier: u32,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_fts_weight")]
    pub fts_weight: f32,
    #[serde(default = "default_graph_weight")]
    pub graph_weight: f32,
    #[serde(default = "default_multi_bonus")]
    pub multi_bonus: f32,
}

fn default_retrieval_multiplier() -> u32 {
    4
}
fn default_vector_weight() -> f32 {
    0.8
}
fn default_fts_weight() -> f32 {
    0.2
}
fn default_graph_weight() -> f32 {
    0.2
}
fn default_multi_bonus() -> f32 {
    0.3
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            retrieval_multiplier: default_retrieval_multiplier(),
            vector_weight: default_vector_weight(),
            fts_weight: default_fts_weight(),
            graph_weight: default_graph_weight(),
            multi_bonus: default_multi_bonus(),
        }
    }
}

/// Exponential-backoff retry knobs for the ingestion task-level retry policy.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retry_backoff_cap_exponent")]
    pub backoff_cap_exponent: u32,
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
}

fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_retry_max_delay_ms() -> u64 {
    30_000
}
fn default_retry_backoff_cap_exponent() -> u32 {
    5
}
fn default_retry_max_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            backoff_cap_exponent: default_retry_backoff_cap_exponent(),
            max_attempts: default_retry_max_attempts(),
        }
    }
}

/// Layered application configuration: `config/*.toml` defaults overridden by
/// environment variables, following the teacher's `config` crate layering.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,

    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub http_port: u16,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,

    #[serde(default = "default_pdf_ingest_mode")]
    pub pdf_ingest_mode: PdfIngestMode,

    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub fastembed_max_length: Option<usize>,
    #[serde(default)]
    pub fastembed_cache_dir: Option<String>,
    #[serde(default)]
    pub fastembed_show_download_progress: Option<bool>,

    #[serde(default = "default_image_processing_model")]
    pub image_processing_model: String,

    #[serde(default = "default_ingest_max_files")]
    pub ingest_max_files: usize,
    #[serde(default = "default_ingest_max_body_bytes")]
    pub ingest_max_body_bytes: usize,
    #[serde(default = "default_ingest_max_content_bytes")]
    pub ingest_max_content_bytes: usize,
    #[serde(default = "default_ingest_max_context_bytes")]
    pub ingest_max_context_bytes: usize,
    #[serde(default = "default_ingest_max_category_bytes")]
    pub ingest_max_category_bytes: usize,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_conversion_timeout_secs")]
    pub conversion_timeout_secs: u64,
    #[serde(default = "default_converter_pool_size")]
    pub converter_pool_size: usize,

    #[serde(default = "default_search_target")]
    pub search_target: SearchTarget,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_reranking_enabled")]
    pub reranking_enabled: bool,
    #[serde(default)]
    pub reranking_pool_size: Option<usize>,
    #[serde(default)]
    pub tuning: RetrievalTuning,

    #[serde(default = "default_rate_limit_tokens_per_min")]
    pub rate_limit_tokens_per_min: u64,
    #[serde(default = "default_safety_buffer_pct")]
    pub safety_buffer_pct: f32,
    #[serde(default = "default_estimated_tokens_per_chunk")]
    pub estimated_tokens_per_chunk: u64,
    #[serde(default = "default_inter_document_delay_ms")]
    pub inter_document_delay_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default = "default_status_retention_hours")]
    pub status_retention_hours: u64,
}

fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_image_processing_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_ingest_max_files() -> usize {
    20
}
fn default_ingest_max_body_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_ingest_max_content_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_ingest_max_context_bytes() -> usize {
    1024 * 1024
}
fn default_ingest_max_category_bytes() -> usize {
    256
}
fn default_max_upload_mb() -> u64 {
    50
}
fn default_allowed_extensions() -> Vec<String> {
    vec![
        "pdf".to_string(),
        "pptx".to_string(),
        "docx".to_string(),
        "ppt".to_string(),
        "doc".to_string(),
    ]
}
fn default_conversion_timeout_secs() -> u64 {
    900
}
fn default_converter_pool_size() -> usize {
    2
}
fn default_retrieval_top_k() -> usize {
    10
}
fn default_reranking_enabled() -> bool {
    true
}
fn default_rate_limit_tokens_per_min() -> u64 {
    4_000_000
}
fn default_safety_buffer_pct() -> f32 {
    0.80
}
fn default_estimated_tokens_per_chunk() -> u64 {
    3_000
}
fn default_inter_document_delay_ms() -> u64 {
    60_000
}
fn default_status_retention_hours() -> u64 {
    24
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            surrealdb_address: String::new(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: String::new(),
            surrealdb_database: String::new(),
            data_dir: default_data_dir(),
            http_port: 0,
            storage: default_storage_kind(),
            pdf_ingest_mode: default_pdf_ingest_mode(),
            embedding_backend: default_embedding_backend(),
            embedding_model: default_embedding_model(),
            fastembed_max_length: None,
            fastembed_cache_dir: None,
            fastembed_show_download_progress: None,
            image_processing_model: default_image_processing_model(),
            ingest_max_files: default_ingest_max_files(),
            ingest_max_body_bytes: default_ingest_max_body_bytes(),
            ingest_max_content_bytes: default_ingest_max_content_bytes(),
            ingest_max_context_bytes: default_ingest_max_context_bytes(),
            ingest_max_category_bytes: default_ingest_max_category_bytes(),
            max_upload_mb: default_max_upload_mb(),
            allowed_extensions: default_allowed_extensions(),
            conversion_timeout_secs: default_conversion_timeout_secs(),
            converter_pool_size: default_converter_pool_size(),
            search_target: default_search_target(),
            strategy: None,
            retrieval_top_k: default_retrieval_top_k(),
            reranking_enabled: default_reranking_enabled(),
            reranking_pool_size: None,
            tuning: RetrievalTuning::default(),
            rate_limit_tokens_per_min: default_rate_limit_tokens_per_min(),
            safety_buffer_pct: default_safety_buffer_pct(),
            estimated_tokens_per_chunk: default_estimated_tokens_per_chunk(),
            inter_document_delay_ms: default_inter_document_delay_ms(),
            retry: RetryConfig::default(),
            status_retention_hours: default_status_retention_hours(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_limits() {
        let config = AppConfig::default();
        assert!(config.ingest_max_files > 0);
        assert_eq!(config.allowed_extensions.len(), 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.tuning.retrieval_multiplier, 4);
    }

    #[test]
    fn override_leaves_remaining_fields_defaulted() {
        let config = AppConfig {
            ingest_max_files: 1,
            ..Default::default()
        };
        assert_eq!(config.ingest_max_files, 1);
        assert_eq!(config.data_dir, default_data_dir());
    }
}
