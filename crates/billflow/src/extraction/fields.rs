use std::collections::BTreeMap;

use regex::Regex;

use crate::config::schema::FieldPattern;
use crate::error::ConfigError;

use super::RawExtraction;

/// Pulls named fields out of document text with pre-compiled patterns.
pub struct FieldExtractor {
    patterns: Vec<CompiledField>,
}

struct CompiledField {
    name: String,
    regex: Regex,
    confidence: f64,
}

impl FieldExtractor {
    pub fn new(fields: &[FieldPattern]) -> Result<Self, ConfigError> {
        let patterns = fields
            .iter()
            .map(|field| {
                let regex = Regex::new(&field.pattern).map_err(|e| ConfigError::InvalidPattern {
                    name: field.name.clone(),
                    reason: e.to_string(),
                })?;
                Ok(CompiledField {
                    name: field.name.clone(),
                    regex,
                    confidence: field.confidence.clamp(0.0, 1.0),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { patterns })
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.name.as_str())
    }

    /// Runs every pattern over `text`. Only matched fields are reported; each
    /// gets the pattern confidence scaled by `base_confidence`.
    pub fn extract(&self, text: &str, base_confidence: f64) -> RawExtraction {
        let base = base_confidence.clamp(0.0, 1.0);
        let mut fields = BTreeMap::new();
        let mut field_confidence = BTreeMap::new();

        for pattern in &self.patterns {
            let Some(caps) = pattern.regex.captures(text) else {
                continue;
            };
            let Some(matched) = caps.name(&pattern.name) else {
                continue;
            };
            let value = matched.as_str().trim();
            if value.is_empty() {
                continue;
            }

            fields.insert(pattern.name.clone(), value.to_string());
            field_confidence.insert(pattern.name.clone(), pattern.confidence * base);
        }

        RawExtraction {
            text: text.to_string(),
            fields,
            field_confidence,
        }
    }
}
