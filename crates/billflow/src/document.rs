//! Inbound documents.
//!
//! A `Document` is created once at the ingestion boundary and is immutable
//! afterwards. The byte buffer is reference counted so downstream stages
//! (including strategies running on the blocking pool) share it instead of
//! copying.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::schema::{DocumentFormat, DEFAULT_MAX_DOCUMENT_BYTES};
use crate::error::InputError;

#[derive(Debug, Clone)]
pub struct Document {
    id: String,
    bytes: Arc<[u8]>,
    declared_size: u64,
    declared_mime: Option<String>,
    format: DocumentFormat,
    filename: Option<String>,
}

impl Document {
    /// Validates size and signature and wraps the bytes.
    pub fn new(
        bytes: Vec<u8>,
        declared_mime: Option<String>,
        max_bytes: u64,
    ) -> Result<Self, InputError> {
        let declared_size = bytes.len() as u64;
        let format = check_bytes(&bytes, max_bytes)?;

        if let Some(ref mime) = declared_mime {
            if mime != format.mime_type() && mime != "application/octet-stream" {
                tracing::warn!(
                    declared = %mime,
                    detected = %format.mime_type(),
                    "Declared MIME type does not match document signature"
                );
            }
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            bytes: Arc::from(bytes),
            declared_size,
            declared_mime,
            format,
            filename: None,
        })
    }

    /// Reads a document from disk, guessing the declared MIME type from the
    /// file extension.
    pub fn from_path(path: &Path, max_bytes: u64) -> Result<Self, InputError> {
        let metadata = std::fs::metadata(path).map_err(|e| InputError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;
        // Refuse before reading a huge file into memory.
        if metadata.len() > max_bytes {
            return Err(InputError::SizeLimit {
                size: metadata.len(),
                limit: max_bytes,
            });
        }

        let bytes = std::fs::read(path).map_err(|e| InputError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;

        let declared_mime = mime_guess::from_path(path)
            .first()
            .map(|m| m.essence_str().to_string());

        let mut document = Self::new(bytes, declared_mime, max_bytes)?;
        document.filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string());
        Ok(document)
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Cheap handle on the shared buffer.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    pub fn declared_mime(&self) -> Option<&str> {
        self.declared_mime.as_deref()
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            document_id: self.id.clone(),
            filename: self
                .filename
                .clone()
                .unwrap_or_else(|| format!("document.{}", self.format.as_str())),
            format: self.format,
            size: self.declared_size,
        }
    }
}

/// Serializable description of a document, carried in workflow state
/// instead of the bytes themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub filename: String,
    pub format: DocumentFormat,
    pub size: u64,
}

/// Checks emptiness, size and signature, in that order.
pub fn check_bytes(bytes: &[u8], max_bytes: u64) -> Result<DocumentFormat, InputError> {
    if bytes.is_empty() {
        return Err(InputError::Format("empty document".to_string()));
    }

    let size = bytes.len() as u64;
    if size > max_bytes {
        return Err(InputError::SizeLimit {
            size,
            limit: max_bytes,
        });
    }

    DocumentFormat::from_signature(bytes)
        .ok_or_else(|| InputError::Format("unrecognized file signature".to_string()))
}

/// Size limit used when no configuration is at hand.
pub fn default_max_bytes() -> u64 {
    DEFAULT_MAX_DOCUMENT_BYTES
}
