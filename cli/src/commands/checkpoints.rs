use serde::Serialize;

use billflow::{WorkflowCheckpoint, WorkflowStep};

use super::emit;
use crate::AppContext;

#[derive(Serialize)]
struct CheckpointLine<'a> {
    id: &'a str,
    workflow_id: &'a str,
    step: WorkflowStep,
    created_at: String,
    consumed: bool,
    consumed_at: Option<String>,
}

impl<'a> From<&'a WorkflowCheckpoint> for CheckpointLine<'a> {
    fn from(checkpoint: &'a WorkflowCheckpoint) -> Self {
        Self {
            id: &checkpoint.id,
            workflow_id: &checkpoint.workflow_id,
            step: checkpoint.step,
            created_at: checkpoint.created_at.to_rfc3339(),
            consumed: checkpoint.consumed,
            consumed_at: checkpoint.consumed_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Prints the checkpoint history of a workflow, oldest first. Payloads are
/// left out; they carry extracted invoice data.
pub async fn run(context: &AppContext, workflow_id: &str) -> i32 {
    match context.pipeline.controller().history(workflow_id).await {
        Ok(history) => {
            if history.is_empty() {
                tracing::info!(workflow_id, "No checkpoints recorded");
            }
            for checkpoint in &history {
                emit(&CheckpointLine::from(checkpoint));
            }
            0
        }
        Err(e) => {
            tracing::error!(workflow_id, error = %e, "Failed to load checkpoint history");
            1
        }
    }
}
