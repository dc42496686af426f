use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::{Config, MAX_TOKEN_TTL_SECS};
use crate::error::ConfigError;
use crate::routing::RoutingThresholds;
use crate::validation::Validator;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Loads a config file. `.yaml`/`.yml` files are parsed as YAML, everything
/// else as JSON; both go through the same schema and semantic checks.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    if is_yaml {
        load_config_from_yaml_str(&content)
    } else {
        load_config_from_str(&content)
    }
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;
    load_config_from_value(json_value)
}

pub fn load_config_from_yaml_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_yaml::from_str(content)?;
    load_config_from_value(json_value)
}

fn load_config_from_value(json_value: serde_json::Value) -> Result<Config, ConfigError> {
    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();

    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express. Any failure here stops
/// startup; nothing is deferred to per-document processing.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    let extraction = &config.extraction;
    if extraction.max_document_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "extraction.max_document_bytes must be positive".to_string(),
        });
    }
    for (name, value) in [
        ("extraction.quality_threshold", extraction.quality_threshold),
        ("extraction.hybrid_penalty", extraction.hybrid_penalty),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::Validation {
                message: format!("{} must be within [0, 1], got {}", name, value),
            });
        }
    }

    let mut field_names = HashSet::new();
    for field in &extraction.fields {
        if !field_names.insert(field.name.as_str()) {
            return Err(ConfigError::InvalidPattern {
                name: field.name.clone(),
                reason: "Duplicate field name".to_string(),
            });
        }

        let regex = regex::Regex::new(&field.pattern).map_err(|e| ConfigError::InvalidPattern {
            name: field.name.clone(),
            reason: e.to_string(),
        })?;

        if !regex.capture_names().any(|n| n == Some(field.name.as_str())) {
            return Err(ConfigError::InvalidPattern {
                name: field.name.clone(),
                reason: format!(
                    "Pattern must contain named capture group '?P<{}>' or '?<{}>'",
                    field.name, field.name
                ),
            });
        }

        if !(0.0..=1.0).contains(&field.confidence) {
            return Err(ConfigError::InvalidPattern {
                name: field.name.clone(),
                reason: format!("confidence must be within [0, 1], got {}", field.confidence),
            });
        }
    }

    Validator::from_config(&config.validation)?;

    RoutingThresholds::from_config(&config.routing).validate()?;

    if !(1..=MAX_TOKEN_TTL_SECS).contains(&config.review.token_ttl_secs) {
        return Err(ConfigError::Validation {
            message: format!(
                "review.token_ttl_secs must be within [1, {}], got {}",
                MAX_TOKEN_TTL_SECS, config.review.token_ttl_secs
            ),
        });
    }

    Ok(())
}
