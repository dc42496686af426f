use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pipeline steps in execution order. The derived ordering follows the
/// declaration order, so `a < b` means `a` runs before `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Extract,
    MergeExtraction,
    Validate,
    Route,
    HumanReview,
    Finalize,
}

impl WorkflowStep {
    pub const ALL: [WorkflowStep; 6] = [
        WorkflowStep::Extract,
        WorkflowStep::MergeExtraction,
        WorkflowStep::Validate,
        WorkflowStep::Route,
        WorkflowStep::HumanReview,
        WorkflowStep::Finalize,
    ];

    /// The step that runs after this one, if any.
    pub fn next(self) -> Option<WorkflowStep> {
        Self::ALL
            .iter()
            .position(|s| *s == self)
            .and_then(|i| Self::ALL.get(i + 1).copied())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::Extract => "extract",
            WorkflowStep::MergeExtraction => "merge_extraction",
            WorkflowStep::Validate => "validate",
            WorkflowStep::Route => "route",
            WorkflowStep::HumanReview => "human_review",
            WorkflowStep::Finalize => "finalize",
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|step| step.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown workflow step '{}'", s))
    }
}
