use std::io::Read;
use std::path::Path;

use super::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestValidationError {
    PayloadTooLarge(String),
    BadRequest(String),
}

/// Reason a queued upload failed the Validator's pre-conversion checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadValidationError {
    NotFound(String),
    NotAFile(String),
    UnsupportedExtension(String),
    TooLarge { size_mb: f64, max_mb: u64 },
    Unreadable(String),
}

impl std::fmt::Display for UploadValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "file not found: {path}"),
            Self::NotAFile(path) => write!(f, "not a regular file: {path}"),
            Self::UnsupportedExtension(ext) => write!(f, "unsupported extension: {ext}"),
            Self::TooLarge { size_mb, max_mb } => {
                write!(f, "file is {size_mb:.2} MB, exceeds the {max_mb} MB limit")
            }
            Self::Unreadable(path) => write!(f, "could not read file: {path}"),
        }
    }
}

/// Validates a queued upload before it is handed to the Converter Adapter:
/// the path exists and is a regular file, the extension is one of
/// `config.allowed_extensions`, the size is within `config.max_upload_mb`,
/// and the first 1 KiB is readable. No side effects.
pub fn validate_upload(path: &Path, config: &AppConfig) -> Result<(), UploadValidationError> {
    let metadata = std::fs::metadata(path)
        .map_err(|_| UploadValidationError::NotFound(path.display().to_string()))?;

    if !metadata.is_file() {
        return Err(UploadValidationError::NotAFile(path.display().to_string()));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !config
        .allowed_extensions
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
    {
        return Err(UploadValidationError::UnsupportedExtension(extension));
    }

    let size_mb = metadata.len() as f64 / (1024.0 * 1024.0);
    if metadata.len() > config.max_upload_mb * 1024 * 1024 {
        return Err(UploadValidationError::TooLarge {
            size_mb,
            max_mb: config.max_upload_mb,
        });
    }

    let mut file = std::fs::File::open(path)
        .map_err(|_| UploadValidationError::Unreadable(path.display().to_string()))?;
    let mut probe = [0u8; 1024];
    file.read(&mut probe)
        .map_err(|_| UploadValidationError::Unreadable(path.display().to_string()))?;

    Ok(())
}

pub fn validate_ingest_input(
    config: &AppConfig,
    content: Option<&str>,
    context: &str,
    category: &str,
    file_count: usize,
) -> Result<(), IngestValidationError> {
    if file_count > config.ingest_max_files {
        return Err(IngestValidationError::BadRequest(format!(
            "Too many files. Maximum allowed is {}",
            config.ingest_max_files
        )));
    }

    if let Some(content) = content {
        if content.len() > config.ingest_max_content_bytes {
            return Err(IngestValidationError::PayloadTooLarge(format!(
                "Content is too large. Maximum allowed is {} bytes",
                config.ingest_max_content_bytes
            )));
        }
    }

    if context.len() > config.ingest_max_context_bytes {
        return Err(IngestValidationError::PayloadTooLarge(format!(
            "Context is too large. Maximum allowed is {} bytes",
            config.ingest_max_context_bytes
        )));
    }

    if category.len() > config.ingest_max_category_bytes {
        return Err(IngestValidationError::PayloadTooLarge(format!(
            "Category is too large. Maximum allowed is {} bytes",
            config.ingest_max_category_bytes
        )));
    }

    Ok(())
}
