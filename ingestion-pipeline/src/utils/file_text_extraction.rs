use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use common::{
    domain::{Converter, Document},
    error::AppError,
};
use uuid::Uuid;

use super::pdf_ingestion::{extract_pdf_content, load_page_numbers};

pub(crate) struct TempPathGuard {
    path: PathBuf,
}

impl TempPathGuard {
    pub(crate) fn as_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempPathGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub(crate) async fn materialize_temp_file(
    bytes: &[u8],
    extension: Option<&str>,
) -> Result<TempPathGuard, AppError> {
    let mut path = env::temp_dir();
    let mut file_name = format!("minne-ingest-{}", Uuid::new_v4());

    if let Some(ext) = extension {
        if !ext.is_empty() {
            file_name.push('.');
            file_name.push_str(ext);
        }
    }

    path.push(file_name);

    tokio::fs::write(&path, bytes).await?;

    Ok(TempPathGuard { path })
}

pub(crate) async fn resolve_existing_local_path(
    storage: &common::storage::store::StorageManager,
    location: &str,
) -> Option<PathBuf> {
    let path = storage.resolve_local_path(location)?;
    match tokio::fs::metadata(&path).await {
        Ok(_) => Some(path),
        Err(_) => None,
    }
}

pub(crate) fn infer_extension(file_info: &common::storage::types::file_info::FileInfo) -> Option<String> {
    Path::new(&file_info.path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_string())
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
        .to_string()
}

/// Local Converter Adapter: a fast PDF text layer with a vision-LLM fallback
/// for scanned/image-only PDFs, and a direct UTF-8 read for the remaining
/// allowed extensions that carry their text uncompressed (`pptx`/`docx`
/// source XML is not unpacked here — see the module doc).
///
/// `pptx`/`docx`/`doc`/`ppt` are accepted by the Validator but have no
/// dedicated layout parser in this adapter; they fall through to the same
/// best-effort UTF-8 read as plain text, which only produces useful output
/// for already-text-like files. A production deployment would swap in a
/// layout-aware parser here behind the same `Converter` trait.
pub struct LocalConverter {
    openai_client: async_openai::Client<async_openai::config::OpenAIConfig>,
    config: common::utils::config::AppConfig,
}

impl LocalConverter {
    pub fn new(
        openai_client: async_openai::Client<async_openai::config::OpenAIConfig>,
        config: common::utils::config::AppConfig,
    ) -> Self {
        Self {
            openai_client,
            config,
        }
    }

    async fn convert_pdf(&self, path: &Path) -> Result<Document, AppError> {
        let pdf_bytes = tokio::fs::read(path).await?;
        let pages = load_page_numbers(pdf_bytes).await.unwrap_or_default();

        let markdown = extract_pdf_content(path, &self.config, &self.openai_client).await?;

        let mut document = Document::new(file_stem(&path.to_string_lossy()), markdown);
        document.pages = pages.len() as u32;
        Ok(document)
    }

    async fn convert_plain_text(&self, path: &Path) -> Result<Document, AppError> {
        let bytes = tokio::fs::read(path).await?;
        let text = String::from_utf8(bytes).map_err(|err| {
            AppError::UnsupportedFormat(format!(
                "{} does not contain a readable text layer: {err}",
                path.display()
            ))
        })?;
        Ok(Document::new(file_stem(&path.to_string_lossy()), text))
    }
}

#[async_trait]
impl Converter for LocalConverter {
    async fn convert(
        &self,
        path: &str,
        timeout: Duration,
        upload_id: Option<&str>,
    ) -> Result<Document, AppError> {
        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let fut = async {
            match extension.as_str() {
                "pdf" => self.convert_pdf(Path::new(path)).await,
                "pptx" | "docx" | "doc" | "ppt" => self.convert_plain_text(Path::new(path)).await,
                other => Err(AppError::UnsupportedFormat(format!(
                    "unsupported upload extension: {other}"
                ))),
            }
        };

        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "conversion of upload {} exceeded {:?}",
                upload_id.unwrap_or("<unknown>"),
                timeout
            ))),
        }
    }
}
