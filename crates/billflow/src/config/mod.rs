pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, load_config_from_yaml_str, validate_config};
pub use schema::{
    Config, DatabaseConfig, DocumentFormat, ExtractionConfig, FieldPattern, OcrConfig,
    ReviewConfig, RoutingConfig, Rule, RuleCheck, Severity, ValidationConfig, MAX_TOKEN_TTL_SECS,
};
