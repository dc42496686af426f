//! Business-rule validation and confidence adjustment.
//!
//! Rules are independent predicates over extracted fields, evaluated in
//! order. Bad data becomes a violation; only a malformed rule set is an
//! error, and that is reported when the validator is built.

pub mod parse;

use std::collections::HashSet;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::schema::{Rule, RuleCheck, Severity, ValidationConfig};
use crate::error::ConfigError;
use crate::extraction::ExtractionResult;

pub use parse::{parse_amount, parse_date};

/// Rules plus the confidence penalties they carry.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    pub blocking_penalty: f64,
    pub advisory_penalty: f64,
}

impl RuleSet {
    pub fn from_config(config: &ValidationConfig) -> Self {
        Self {
            rules: config.rules.clone(),
            blocking_penalty: config.blocking_penalty,
            advisory_penalty: config.advisory_penalty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<Violation>,
    pub adjusted_confidence: f64,
}

impl ValidationResult {
    pub fn blocking(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Blocking)
    }

    pub fn advisory(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Advisory)
    }
}

/// Rule with its regex compiled.
#[derive(Debug)]
struct CompiledRule {
    rule: Rule,
    regex: Option<Regex>,
}

#[derive(Debug)]
pub struct Validator {
    rules: Vec<CompiledRule>,
    blocking_penalty: f64,
    advisory_penalty: f64,
}

impl Validator {
    /// Checks the rule set and compiles it.
    pub fn new(rule_set: RuleSet) -> Result<Self, ConfigError> {
        if rule_set.rules.is_empty() {
            return Err(ConfigError::InvalidRuleSet {
                reason: "at least one rule is required".to_string(),
            });
        }
        for (name, value) in [
            ("blocking_penalty", rule_set.blocking_penalty),
            ("advisory_penalty", rule_set.advisory_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidRuleSet {
                    reason: format!("{} must be within [0, 1], got {}", name, value),
                });
            }
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(rule_set.rules.len());
        for rule in rule_set.rules {
            if rule.id.trim().is_empty() {
                return Err(ConfigError::InvalidRuleSet {
                    reason: "rule id must not be empty".to_string(),
                });
            }
            if !seen.insert(rule.id.clone()) {
                return Err(invalid(&rule, "duplicate rule id"));
            }
            rules.push(compile(rule)?);
        }

        Ok(Self {
            rules,
            blocking_penalty: rule_set.blocking_penalty,
            advisory_penalty: rule_set.advisory_penalty,
        })
    }

    pub fn from_config(config: &ValidationConfig) -> Result<Self, ConfigError> {
        Self::new(RuleSet::from_config(config))
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Validates against today's local date.
    pub fn validate(&self, extraction: &ExtractionResult) -> ValidationResult {
        self.validate_at(extraction, chrono::Local::now().date_naive())
    }

    /// Validates with `today` as the reference for date rules.
    pub fn validate_at(&self, extraction: &ExtractionResult, today: NaiveDate) -> ValidationResult {
        let _span = tracing::info_span!("validate", rules = self.rules.len()).entered();

        let violations: Vec<Violation> = self
            .rules
            .iter()
            .filter_map(|compiled| {
                evaluate(compiled, extraction, today).map(|message| Violation {
                    rule_id: compiled.rule.id.clone(),
                    field: compiled.rule.check.field().to_string(),
                    message: compiled.rule.message.clone().unwrap_or(message),
                    severity: compiled.rule.severity,
                })
            })
            .collect();

        let blocking = violations
            .iter()
            .filter(|v| v.severity == Severity::Blocking)
            .count();
        let advisory = violations.len() - blocking;

        let adjusted_confidence = self.adjust(extraction.confidence, blocking, advisory);

        tracing::debug!(
            blocking,
            advisory,
            confidence = extraction.confidence,
            adjusted_confidence,
            "Validation finished"
        );

        ValidationResult {
            valid: blocking == 0,
            violations,
            adjusted_confidence,
        }
    }

    /// Subtracts a fixed step per violation, floored at zero.
    fn adjust(&self, confidence: f64, blocking: usize, advisory: usize) -> f64 {
        let penalty =
            self.blocking_penalty * blocking as f64 + self.advisory_penalty * advisory as f64;
        (confidence.clamp(0.0, 1.0) - penalty).max(0.0)
    }
}

fn invalid(rule: &Rule, reason: &str) -> ConfigError {
    ConfigError::InvalidRule {
        id: rule.id.clone(),
        reason: reason.to_string(),
    }
}

fn compile(rule: Rule) -> Result<CompiledRule, ConfigError> {
    if rule.check.field().trim().is_empty() {
        return Err(invalid(&rule, "field must not be empty"));
    }

    let mut regex = None;
    match &rule.check {
        RuleCheck::AmountRange {
            min_exclusive,
            max_inclusive,
            ..
        } => match (min_exclusive, max_inclusive) {
            (None, None) => return Err(invalid(&rule, "amount range needs a bound")),
            (_, Some(max)) if *max <= Decimal::ZERO => {
                return Err(invalid(&rule, "max_inclusive must be positive"))
            }
            (Some(min), Some(max)) if min >= max => {
                return Err(invalid(&rule, "min_exclusive must be below max_inclusive"))
            }
            _ => {}
        },
        RuleCheck::Denylist { values, .. } => {
            if values.iter().all(|v| v.trim().is_empty()) {
                return Err(invalid(&rule, "denylist must not be empty"));
            }
        }
        RuleCheck::Pattern { pattern, .. } => {
            regex = Some(Regex::new(pattern).map_err(|e| invalid(&rule, &e.to_string()))?);
        }
        RuleCheck::MinFieldConfidence { min, .. } => {
            if !(0.0..=1.0).contains(min) {
                return Err(invalid(&rule, "min must be within [0, 1]"));
            }
        }
        RuleCheck::RequiredField { .. } | RuleCheck::DateNotInFuture { .. } => {}
    }

    Ok(CompiledRule { rule, regex })
}

/// Returns a violation message when the rule fails. Rules other than
/// `required_field` pass when their field is absent.
fn evaluate(compiled: &CompiledRule, extraction: &ExtractionResult, today: NaiveDate) -> Option<String> {
    let check = &compiled.rule.check;
    let field = check.field();
    let value = extraction
        .field(field)
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let RuleCheck::RequiredField { .. } = check {
        return match value {
            Some(_) => None,
            None => Some(format!("Required field '{}' is missing", field)),
        };
    }

    let value = value?;

    match check {
        RuleCheck::RequiredField { .. } => None,
        RuleCheck::AmountRange {
            min_exclusive,
            max_inclusive,
            ..
        } => {
            let Some(amount) = parse_amount(value) else {
                return Some(format!("Field '{}' is not a valid amount: '{}'", field, value));
            };
            if let Some(min) = min_exclusive {
                if amount <= *min {
                    return Some(format!("{} must be greater than {}, got {}", field, min, amount));
                }
            }
            if let Some(max) = max_inclusive {
                if amount > *max {
                    return Some(format!("{} must not exceed {}, got {}", field, max, amount));
                }
            }
            None
        }
        RuleCheck::DateNotInFuture { .. } => match parse_date(value) {
            None => Some(format!("Field '{}' is not a valid date: '{}'", field, value)),
            Some(date) if date > today => Some(format!("{} {} is in the future", field, date)),
            Some(_) => None,
        },
        RuleCheck::Denylist { values, .. } => {
            let lower = value.to_lowercase();
            values
                .iter()
                .map(|v| v.trim().to_lowercase())
                .find(|denied| !denied.is_empty() && lower.contains(denied.as_str()))
                .map(|denied| format!("{} '{}' matches denylisted '{}'", field, value, denied))
        }
        RuleCheck::Pattern { pattern, .. } => {
            let matched = compiled
                .regex
                .as_ref()
                .is_some_and(|regex| regex.is_match(value));
            (!matched).then(|| format!("{} '{}' does not match {}", field, value, pattern))
        }
        RuleCheck::MinFieldConfidence { min, .. } => {
            let confidence = extraction.field_confidence.get(field).copied().unwrap_or(0.0);
            (confidence < *min).then(|| {
                format!(
                    "{} confidence {:.2} is below {:.2}",
                    field, confidence, min
                )
            })
        }
    }
}
