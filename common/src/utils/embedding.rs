use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::CreateEmbeddingRequestArgs;
use async_openai::Client as OpenAIClient;
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig, utils::config::EmbeddingBackend};

/// Selects and owns the embedding backend configured via
/// `AppConfig::embedding_backend`: OpenAI's hosted embeddings API, a locally
/// loaded FastEmbed model, or a deterministic hashed embedding for tests.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAi {
        client: Arc<OpenAIClient<OpenAIConfig>>,
        model: String,
        dimension: usize,
    },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        model_name: EmbeddingModel,
        dimension: usize,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    /// Builds a provider from configuration. `openai_client` is required when
    /// `embedding_backend == OpenAi` and ignored otherwise.
    pub async fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<OpenAIClient<OpenAIConfig>>>,
    ) -> Result<Self, AppError> {
        match config.embedding_backend {
            EmbeddingBackend::OpenAi => {
                let client = openai_client.ok_or_else(|| {
                    AppError::InternalError(
                        "OpenAI client required for the openai embedding backend".into(),
                    )
                })?;
                let dimension = openai_embedding_dimension(&config.embedding_model);
                Ok(Self {
                    inner: EmbeddingInner::OpenAi {
                        client,
                        model: config.embedding_model.clone(),
                        dimension,
                    },
                })
            }
            EmbeddingBackend::FastEmbed => {
                let model_name = EmbeddingModel::from_str(&config.embedding_model)
                    .unwrap_or(EmbeddingModel::AllMiniLML6V2);
                let max_length = config.fastembed_max_length;
                let show_progress = config.fastembed_show_download_progress.unwrap_or(false);
                let model_name_for_task = model_name.clone();

                let (model, dimension) = tokio::task::spawn_blocking(move || {
                    let mut options = TextInitOptions::new(model_name_for_task.clone())
                        .with_show_download_progress(show_progress);
                    if let Some(max_length) = max_length {
                        options = options.with_max_length(max_length);
                    }
                    let model = TextEmbedding::try_new(options).map_err(|err| {
                        AppError::Processing(format!("failed to load FastEmbed model: {err}"))
                    })?;
                    let dim = EmbeddingModel::get_model_info(&model_name_for_task)
                        .map(|info| info.dim)
                        .ok_or_else(|| {
                            AppError::Processing("FastEmbed model metadata missing".into())
                        })?;
                    Ok::<_, AppError>((model, dim))
                })
                .await
                .map_err(AppError::Join)??;

                Ok(Self {
                    inner: EmbeddingInner::FastEmbed {
                        model: Arc::new(Mutex::new(model)),
                        model_name,
                        dimension,
                    },
                })
            }
            EmbeddingBackend::Hashed => Self::new_hashed(384),
        }
    }

    /// Deterministic hashed embedding, used by tests and offline smoke runs
    /// that must not depend on a downloaded model or network access.
    pub fn new_hashed(dimension: usize) -> Result<Self, AppError> {
        Ok(Self {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        })
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::OpenAi { .. } => "openai",
            EmbeddingInner::FastEmbed { .. } => "fastembed",
            EmbeddingInner::Hashed { .. } => "hashed",
        }
    }

    pub fn model_code(&self) -> Option<String> {
        match &self.inner {
            EmbeddingInner::OpenAi { model, .. } => Some(model.clone()),
            EmbeddingInner::FastEmbed { model_name, .. } => Some(model_name.to_string()),
            EmbeddingInner::Hashed { .. } => None,
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::OpenAi { dimension, .. } => *dimension,
            EmbeddingInner::FastEmbed { dimension, .. } => *dimension,
            EmbeddingInner::Hashed { dimension } => *dimension,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        match &self.inner {
            EmbeddingInner::OpenAi {
                client,
                model,
                dimension,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model)
                    .dimensions(*dimension as u32)
                    .input([text])
                    .build()?;
                let response = client.embeddings().create(request).await?;
                response
                    .data
                    .into_iter()
                    .next()
                    .map(|d| d.embedding)
                    .ok_or_else(|| AppError::LLMParsing("No embedding data received".into()))
            }
            EmbeddingInner::FastEmbed { model, .. } => {
                let mut guard = model.lock().await;
                let embeddings = guard.embed(vec![text.to_owned()], None).map_err(|err| {
                    AppError::Processing(format!("FastEmbed inference failed: {err}"))
                })?;
                embeddings
                    .into_iter()
                    .next()
                    .ok_or_else(|| AppError::Processing("FastEmbed returned no vector".into()))
            }
            EmbeddingInner::Hashed { dimension } => Ok(hashed_embedding(text, *dimension)),
        }
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match &self.inner {
            EmbeddingInner::FastEmbed { model, .. } => {
                let mut guard = model.lock().await;
                guard.embed(texts, None).map_err(|err| {
                    AppError::Processing(format!("FastEmbed batch inference failed: {err}"))
                })
            }
            EmbeddingInner::OpenAi { .. } | EmbeddingInner::Hashed { .. } => {
                let mut out = Vec::with_capacity(texts.len());
                for text in texts {
                    out.push(self.embed(&text).await?);
                }
                Ok(out)
            }
        }
    }
}

pub fn openai_embedding_dimension(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    let mut token_count = 0f32;
    for token in tokens(text) {
        token_count += 1.0;
        let idx = bucket(&token, dim);
        vector[idx] += 1.0;
    }

    if token_count == 0.0 {
        return vector;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_lowercase)
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}

/// Generates an embedding vector for an explicit model/dimension pair.
/// Kept as a free function for the embedding-migration call sites
/// (`KnowledgeEntity::patch`, `TextChunk::update_all_embeddings`) that
/// re-embed existing rows against a newly chosen model; prefer calling
/// `EmbeddingProvider::embed` directly in new code.
pub async fn generate_embedding_with_params(
    client: &OpenAIClient<OpenAIConfig>,
    input: &str,
    model: &str,
    dimensions: u32,
) -> Result<Vec<f32>, AppError> {
    let request = CreateEmbeddingRequestArgs::default()
        .model(model)
        .dimensions(dimensions)
        .input([input])
        .build()?;

    let response = client.embeddings().create(request).await?;

    let embedding: Vec<f32> = response
        .data
        .first()
        .ok_or_else(|| AppError::LLMParsing("No embedding data received".into()))?
        .embedding
        .clone();

    debug!(dimensions = embedding.len(), "embedding generated");

    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_embedding_is_deterministic_and_normalized() {
        let a = hashed_embedding("scuba regulator maintenance", 64);
        let b = hashed_embedding("scuba regulator maintenance", 64);
        assert_eq!(a, b);

        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[test]
    fn hashed_embedding_empty_text_is_zero_vector() {
        let v = hashed_embedding("", 16);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn hashed_provider_reports_configured_dimension() {
        let provider = EmbeddingProvider::new_hashed(32).expect("provider");
        assert_eq!(provider.dimension(), 32);
        assert_eq!(provider.backend_label(), "hashed");
        let embedding = provider.embed("dive plan").await.expect("embedding");
        assert_eq!(embedding.len(), 32);
    }
}
