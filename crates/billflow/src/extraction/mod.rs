//! Tiered field extraction.
//!
//! A fast text-layer strategy runs first; an OCR strategy is only consulted
//! when the fast result scores below the quality threshold. Strategy
//! failures never escape `ExtractionEngine::extract`; they degrade the result
//! instead.

pub mod engine;
pub mod fields;
pub mod ocr;
pub mod quality;
pub mod text_layer;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::schema::DocumentFormat;
use crate::error::ExtractionError;

pub use engine::{EngineSettings, ExtractionEngine};
pub use fields::FieldExtractor;
pub use ocr::OcrStrategy;
pub use text_layer::TextLayerStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethod {
    FastPath,
    Fallback,
    Hybrid,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::FastPath => "fast-path",
            ExtractionMethod::Fallback => "fallback",
            ExtractionMethod::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single strategy produced before scoring.
#[derive(Debug, Clone, Default)]
pub struct RawExtraction {
    pub text: String,
    pub fields: BTreeMap<String, String>,
    pub field_confidence: BTreeMap<String, f64>,
}

/// A way of turning document bytes into text and fields.
///
/// Implementations are synchronous and may block; the engine runs them on
/// the blocking pool.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract_raw(
        &self,
        bytes: &[u8],
        format: DocumentFormat,
    ) -> Result<RawExtraction, ExtractionError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub fields: BTreeMap<String, String>,
    pub field_confidence: BTreeMap<String, f64>,
    pub confidence: f64,
    pub method: ExtractionMethod,
    pub quality: f64,
    #[serde(default)]
    pub notes: Vec<String>,
    /// Multiplier applied to the mean field confidence. Below 1.0 only for
    /// hybrid results.
    #[serde(default = "default_confidence_scale")]
    pub confidence_scale: f64,
    /// Extracted text. Not persisted in checkpoints.
    #[serde(skip)]
    pub text: String,
}

fn default_confidence_scale() -> f64 {
    1.0
}

impl ExtractionResult {
    pub(crate) fn from_raw(
        raw: RawExtraction,
        method: ExtractionMethod,
        quality: f64,
        confidence_scale: f64,
        notes: Vec<String>,
    ) -> Self {
        let mut result = Self {
            fields: raw.fields,
            field_confidence: raw.field_confidence,
            confidence: 0.0,
            method,
            quality,
            notes,
            confidence_scale: confidence_scale.clamp(0.0, 1.0),
            text: raw.text,
        };
        result.recompute_confidence();
        result
    }

    /// Structurally valid result for a document nothing could be read from.
    pub fn failed(notes: Vec<String>) -> Self {
        Self {
            fields: BTreeMap::new(),
            field_confidence: BTreeMap::new(),
            confidence: 0.0,
            method: ExtractionMethod::Hybrid,
            quality: 0.0,
            notes,
            confidence_scale: 1.0,
            text: String::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Merges reviewer corrections. Corrected fields are taken as certain.
    pub fn apply_corrections(&mut self, corrections: &BTreeMap<String, String>) {
        if corrections.is_empty() {
            return;
        }
        for (name, value) in corrections {
            self.fields.insert(name.clone(), value.clone());
            self.field_confidence.insert(name.clone(), 1.0);
        }
        self.notes
            .push(format!("{} field(s) corrected by reviewer", corrections.len()));
        self.recompute_confidence();
    }

    /// Confidence is computed over the fields that were found; a result with
    /// no fields has confidence 0.
    fn recompute_confidence(&mut self) {
        let found: Vec<f64> = self
            .fields
            .keys()
            .filter_map(|name| self.field_confidence.get(name).copied())
            .collect();
        self.confidence = if found.is_empty() {
            0.0
        } else {
            let mean = found.iter().sum::<f64>() / found.len() as f64;
            (mean * self.confidence_scale).clamp(0.0, 1.0)
        };
    }

    pub fn is_consistent(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence)
            && self
                .fields
                .keys()
                .all(|name| self.field_confidence.contains_key(name))
    }
}
