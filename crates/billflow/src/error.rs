use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BillflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Resume error: {0}")]
    Resume(#[from] crate::checkpoint::ResumeError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid field pattern '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },

    #[error("Invalid rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("Invalid rule set: {reason}")]
    InvalidRuleSet { reason: String },
}

/// Caller-correctable problems with an inbound document. Never retried.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Unsupported document format: {0}")]
    Format(String),

    #[error("Document is {size} bytes, limit is {limit} bytes")]
    SizeLimit { size: u64, limit: u64 },

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl InputError {
    /// Stable code for the boundary layer.
    pub fn code(&self) -> &'static str {
        match self {
            InputError::Format(_) => "unsupported_format",
            InputError::SizeLimit { .. } => "document_too_large",
            InputError::ReadDocument { .. } => "document_unreadable",
        }
    }

    /// Text suitable for showing to the person who submitted the document.
    pub fn user_message(&self) -> String {
        match self {
            InputError::Format(_) => {
                "This file is not a supported invoice format. Please attach a PDF, PNG, JPEG or TIFF."
                    .to_string()
            }
            InputError::SizeLimit { limit, .. } => format!(
                "This file is too large. Please attach a file smaller than {} MB.",
                limit / (1024 * 1024)
            ),
            InputError::ReadDocument { .. } => {
                "This file could not be read. Please attach it again.".to_string()
            }
        }
    }
}

/// Failures inside a single extraction strategy. The engine recovers from
/// these by falling back, so they never reach callers of `extract`.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Strategy does not handle {0} documents")]
    Unsupported(String),

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Failed to process image: {0}")]
    ImageProcessing(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("Extraction task aborted: {0}")]
    TaskAborted(String),
}

pub type Result<T> = std::result::Result<T, BillflowError>;
