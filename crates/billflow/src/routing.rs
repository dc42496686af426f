//! Maps validated confidence and amount to an approval decision.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::schema::RoutingConfig;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingThresholds {
    pub auto_approve_max_amount: Decimal,
    pub auto_approve_min_confidence: f64,
    pub manual_review_min_confidence: f64,
}

impl RoutingThresholds {
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self {
            auto_approve_max_amount: config.auto_approve_max_amount,
            auto_approve_min_confidence: config.auto_approve_min_confidence,
            manual_review_min_confidence: config.manual_review_min_confidence,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("auto_approve_min_confidence", self.auto_approve_min_confidence),
            ("manual_review_min_confidence", self.manual_review_min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Validation {
                    message: format!("routing.{} must be within [0, 1], got {}", name, value),
                });
            }
        }

        if self.manual_review_min_confidence > self.auto_approve_min_confidence {
            return Err(ConfigError::Validation {
                message: format!(
                    "routing.manual_review_min_confidence ({}) must not exceed auto_approve_min_confidence ({})",
                    self.manual_review_min_confidence, self.auto_approve_min_confidence
                ),
            });
        }

        if self.auto_approve_max_amount < Decimal::ZERO {
            return Err(ConfigError::Validation {
                message: "routing.auto_approve_max_amount must not be negative".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for RoutingThresholds {
    fn default() -> Self {
        Self::from_config(&RoutingConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    AutoApprove,
    AutoReject,
    HumanReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    WithinAutoApproveLimits,
    BlockingViolation,
    ConfidenceBelowFloor,
    ConfidenceInReviewBand,
    AmountAboveLimit,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::WithinAutoApproveLimits => "within_auto_approve_limits",
            ReasonCode::BlockingViolation => "blocking_violation",
            ReasonCode::ConfidenceBelowFloor => "confidence_below_floor",
            ReasonCode::ConfidenceInReviewBand => "confidence_in_review_band",
            ReasonCode::AmountAboveLimit => "amount_above_limit",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long a reviewer has to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPolicy {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub decision: Decision,
    pub reason: ReasonCode,
    pub thresholds: RoutingThresholds,
    pub confidence: f64,
    pub amount: Option<Decimal>,
    /// Always set for `HumanReview`.
    pub review_policy: Option<ReviewPolicy>,
}

impl ApprovalDecision {
    pub fn needs_review(&self) -> bool {
        self.decision == Decision::HumanReview
    }
}

#[derive(Debug, Clone)]
pub struct ApprovalRouter {
    thresholds: RoutingThresholds,
    review_ttl_secs: u64,
}

impl ApprovalRouter {
    pub fn new(thresholds: RoutingThresholds, review_ttl_secs: u64) -> Self {
        Self {
            thresholds,
            review_ttl_secs,
        }
    }

    pub fn thresholds(&self) -> &RoutingThresholds {
        &self.thresholds
    }

    /// Pure decision function. Blocking violations win over everything,
    /// then the auto-approve bar, then the rejection floor.
    pub fn route(&self, confidence: f64, amount: Option<Decimal>, valid: bool) -> ApprovalDecision {
        let t = &self.thresholds;
        let confident = confidence >= t.auto_approve_min_confidence;
        let within_limit = amount.is_some_and(|a| a <= t.auto_approve_max_amount);

        let (decision, reason) = if !valid {
            (Decision::HumanReview, ReasonCode::BlockingViolation)
        } else if confident && within_limit {
            (Decision::AutoApprove, ReasonCode::WithinAutoApproveLimits)
        } else if confidence < t.manual_review_min_confidence {
            (Decision::AutoReject, ReasonCode::ConfidenceBelowFloor)
        } else if confident {
            (Decision::HumanReview, ReasonCode::AmountAboveLimit)
        } else {
            (Decision::HumanReview, ReasonCode::ConfidenceInReviewBand)
        };

        let review_policy = (decision == Decision::HumanReview).then_some(ReviewPolicy {
            ttl_secs: self.review_ttl_secs,
        });

        let _span = tracing::info_span!("route").entered();
        tracing::debug!(
            decision = ?decision,
            reason = %reason,
            confidence,
            amount = ?amount,
            "Routing decision"
        );

        ApprovalDecision {
            decision,
            reason,
            thresholds: t.clone(),
            confidence,
            amount,
            review_policy,
        }
    }
}
