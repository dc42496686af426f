use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum accepted document size when the config does not say otherwise.
pub const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 25 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            worker_count: default_worker_count(),
            extraction: ExtractionConfig::default(),
            validation: ValidationConfig::default(),
            routing: RoutingConfig::default(),
            review: ReviewConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: u64,
    /// Minimum fast-path quality score accepted without running the fallback.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    /// Multiplier applied to the confidence of a hybrid result.
    #[serde(default = "default_hybrid_penalty")]
    pub hybrid_penalty: f64,
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
    #[serde(default = "default_fields")]
    pub fields: Vec<FieldPattern>,
    #[serde(default)]
    pub ocr: OcrConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            quality_threshold: default_quality_threshold(),
            hybrid_penalty: default_hybrid_penalty(),
            keywords: default_keywords(),
            fields: default_fields(),
            ocr: OcrConfig::default(),
        }
    }
}

fn default_max_document_bytes() -> u64 {
    DEFAULT_MAX_DOCUMENT_BYTES
}

fn default_quality_threshold() -> f64 {
    0.7
}

fn default_hybrid_penalty() -> f64 {
    0.8
}

fn default_keywords() -> Vec<String> {
    [
        "invoice", "total", "vendor", "amount", "date", "tax", "receipt", "due", "bill",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// A named field pulled out of document text by a regex with a named
/// capture group of the same name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldPattern {
    pub name: String,
    pub pattern: String,
    /// How much a match of this pattern is trusted, before the strategy's
    /// own base confidence is applied.
    #[serde(default = "default_pattern_confidence")]
    pub confidence: f64,
}

impl FieldPattern {
    pub fn new(name: &str, pattern: &str, confidence: f64) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            confidence,
        }
    }
}

fn default_pattern_confidence() -> f64 {
    0.9
}

pub fn default_fields() -> Vec<FieldPattern> {
    vec![
        FieldPattern::new(
            "invoice_number",
            r"(?i)invoice\s*(?:no\.?|number|#)\s*[:#]?\s*(?P<invoice_number>[A-Z0-9][A-Z0-9\-/]{2,})",
            0.95,
        ),
        FieldPattern::new(
            "vendor",
            r"(?im)^\s*(?:from|vendor|seller|supplier|billed\s+by)\s*[:\-]?\s*(?P<vendor>[^\n]+?)\s*$",
            0.9,
        ),
        FieldPattern::new(
            "date",
            r"(?i)\bdate\s*[:\-]?\s*(?P<date>\d{4}-\d{2}-\d{2}|\d{1,2}[./]\d{1,2}[./]\d{4})",
            0.95,
        ),
        FieldPattern::new(
            "total",
            r"(?i)\b(?:grand\s+)?total(?:\s+due)?\s*[:\-]?\s*(?:[$€£]|USD|EUR|GBP|CHF)?\s*(?P<total>\d+(?:[,.']\d{3})*(?:[.,]\d{1,2})?)",
            0.97,
        ),
        FieldPattern::new("currency", r"(?P<currency>USD|EUR|GBP|CHF|[$€£])", 0.9),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

fn default_true() -> bool {
    true
}

fn default_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

fn default_dpi() -> u32 {
    300
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            languages: default_languages(),
            dpi: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_blocking_penalty")]
    pub blocking_penalty: f64,
    #[serde(default = "default_advisory_penalty")]
    pub advisory_penalty: f64,
    #[serde(default = "default_rules")]
    pub rules: Vec<Rule>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            blocking_penalty: default_blocking_penalty(),
            advisory_penalty: default_advisory_penalty(),
            rules: default_rules(),
        }
    }
}

fn default_blocking_penalty() -> f64 {
    0.15
}

fn default_advisory_penalty() -> f64 {
    0.05
}

pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "total-required",
            Severity::Blocking,
            RuleCheck::RequiredField {
                field: "total".to_string(),
            },
        ),
        Rule::new(
            "total-range",
            Severity::Blocking,
            RuleCheck::AmountRange {
                field: "total".to_string(),
                min_exclusive: Some(Decimal::ZERO),
                max_inclusive: Some(Decimal::from(100_000)),
            },
        ),
        Rule::new(
            "date-not-in-future",
            Severity::Blocking,
            RuleCheck::DateNotInFuture {
                field: "date".to_string(),
            },
        ),
        Rule::new(
            "vendor-required",
            Severity::Advisory,
            RuleCheck::RequiredField {
                field: "vendor".to_string(),
            },
        ),
        Rule::new(
            "invoice-number-required",
            Severity::Advisory,
            RuleCheck::RequiredField {
                field: "invoice_number".to_string(),
            },
        ),
        Rule::new(
            "total-confidence",
            Severity::Advisory,
            RuleCheck::MinFieldConfidence {
                field: "total".to_string(),
                min: 0.6,
            },
        ),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Forces human review regardless of confidence.
    #[default]
    Blocking,
    Advisory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub severity: Severity,
    /// Overrides the generated violation message.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub check: RuleCheck,
}

impl Rule {
    pub fn new(id: &str, severity: Severity, check: RuleCheck) -> Self {
        Self {
            id: id.to_string(),
            severity,
            message: None,
            check,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    RequiredField {
        field: String,
    },
    AmountRange {
        field: String,
        #[serde(default)]
        min_exclusive: Option<Decimal>,
        #[serde(default)]
        max_inclusive: Option<Decimal>,
    },
    DateNotInFuture {
        field: String,
    },
    /// Case-insensitive; a value fails when it contains any listed entry.
    Denylist {
        field: String,
        values: Vec<String>,
    },
    Pattern {
        field: String,
        pattern: String,
    },
    MinFieldConfidence {
        field: String,
        min: f64,
    },
}

impl RuleCheck {
    pub fn field(&self) -> &str {
        match self {
            RuleCheck::RequiredField { field }
            | RuleCheck::AmountRange { field, .. }
            | RuleCheck::DateNotInFuture { field }
            | RuleCheck::Denylist { field, .. }
            | RuleCheck::Pattern { field, .. }
            | RuleCheck::MinFieldConfidence { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Extracted field holding the document amount.
    #[serde(default = "default_amount_field")]
    pub amount_field: String,
    #[serde(default = "default_auto_approve_max_amount")]
    pub auto_approve_max_amount: Decimal,
    #[serde(default = "default_auto_approve_min_confidence")]
    pub auto_approve_min_confidence: f64,
    #[serde(default = "default_manual_review_min_confidence")]
    pub manual_review_min_confidence: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            amount_field: default_amount_field(),
            auto_approve_max_amount: default_auto_approve_max_amount(),
            auto_approve_min_confidence: default_auto_approve_min_confidence(),
            manual_review_min_confidence: default_manual_review_min_confidence(),
        }
    }
}

fn default_amount_field() -> String {
    "total".to_string()
}

fn default_auto_approve_max_amount() -> Decimal {
    Decimal::from(1000)
}

fn default_auto_approve_min_confidence() -> f64 {
    0.9
}

fn default_manual_review_min_confidence() -> f64 {
    0.5
}

/// Longest review window a token may be issued for: 365 days.
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Lifetime of a resume token.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

fn default_token_ttl_secs() -> u64 {
    24 * 60 * 60
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; `~/.billflow/data/billflow.db` when unset.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Png,
    Jpeg,
    Tiff,
}

impl DocumentFormat {
    /// Detects the format from the leading magic bytes.
    pub fn from_signature(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF-") {
            Some(DocumentFormat::Pdf)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(DocumentFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(DocumentFormat::Jpeg)
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Some(DocumentFormat::Tiff)
        } else {
            None
        }
    }

    /// Format implied by a file extension. Used to pick candidate files
    /// when walking directories; the signature still decides.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "png" => Some(DocumentFormat::Png),
            "jpg" | "jpeg" => Some(DocumentFormat::Jpeg),
            "tif" | "tiff" => Some(DocumentFormat::Tiff),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Png => "image/png",
            DocumentFormat::Jpeg => "image/jpeg",
            DocumentFormat::Tiff => "image/tiff",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Png => "png",
            DocumentFormat::Jpeg => "jpeg",
            DocumentFormat::Tiff => "tiff",
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, DocumentFormat::Pdf)
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
