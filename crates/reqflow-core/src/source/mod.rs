//! Source document text extraction

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Why a document could not be turned into text
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported document format '{0}'")]
    Unsupported(String),
    #[error("document not found: {0}")]
    NotFound(PathBuf),
    #[error("document is not valid UTF-8 text: {0}")]
    Encoding(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ExtractionError> for crate::error::Error {
    fn from(err: ExtractionError) -> Self {
        crate::error::Error::ExtractionFailed(err.to_string())
    }
}

/// Turns a document reference into plain text
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, document: &Path) -> Result<String, ExtractionError>;
}

/// Reads `.txt` and `.md` documents as UTF-8
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    const EXTENSIONS: [&'static str; 4] = ["txt", "md", "markdown", "text"];

    pub fn supports(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| Self::EXTENSIONS.contains(&e.to_lowercase().as_str()))
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, document: &Path) -> Result<String, ExtractionError> {
        if !Self::supports(document) {
            let ext = document
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string();
            return Err(ExtractionError::Unsupported(ext));
        }
        let bytes = match tokio::fs::read(document).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExtractionError::NotFound(document.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        String::from_utf8(bytes).map_err(|_| ExtractionError::Encoding(document.to_path_buf()))
    }
}
