use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::checkpoint::{ResumeError, WorkflowStep};
use crate::document::DocumentSummary;
use crate::extraction::ExtractionResult;
use crate::routing::ApprovalDecision;
use crate::validation::ValidationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    AwaitingReview,
    Approved,
    Rejected,
    Failed,
}

/// Everything a workflow knows about one document. This is what a
/// checkpoint stores, so a resume can rebuild the workflow from it alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub document: DocumentSummary,
    pub extraction: ExtractionResult,
    #[serde(default)]
    pub validation: Option<ValidationResult>,
    #[serde(default)]
    pub decision: Option<ApprovalDecision>,
    /// Reviewer feedback, oldest first.
    #[serde(default)]
    pub feedback: Vec<String>,
    /// All reviewer corrections applied so far.
    #[serde(default)]
    pub corrections: BTreeMap<String, String>,
    #[serde(default)]
    pub review_rounds: u32,
    pub step: WorkflowStep,
    pub status: WorkflowStatus,
}

impl WorkflowState {
    pub fn new(workflow_id: &str, document: DocumentSummary, extraction: ExtractionResult) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            document,
            extraction,
            validation: None,
            decision: None,
            feedback: Vec::new(),
            corrections: BTreeMap::new(),
            review_rounds: 0,
            step: WorkflowStep::Extract,
            status: WorkflowStatus::Running,
        }
    }

    pub fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, ResumeError> {
        Self::deserialize(payload).map_err(|e| ResumeError::InvalidCheckpoint(e.to_string()))
    }

    /// Whether `payload` would decode, with the decode error as text.
    pub fn check_payload(payload: &serde_json::Value) -> Result<(), String> {
        Self::deserialize(payload)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    /// Confidence the router saw, or the raw extraction confidence before
    /// validation has run.
    pub fn confidence(&self) -> f64 {
        self.validation
            .as_ref()
            .map(|v| v.adjusted_confidence)
            .unwrap_or(self.extraction.confidence)
    }
}
