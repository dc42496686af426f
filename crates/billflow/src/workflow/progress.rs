use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::checkpoint::WorkflowStep;

use super::state::WorkflowStatus;

/// Events emitted while a workflow runs. Token values are never included.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Step {
        workflow_id: String,
        step: WorkflowStep,
        message: String,
    },
    Suspended {
        workflow_id: String,
        checkpoint_id: String,
        expires_at: DateTime<Utc>,
    },
    Resumed {
        workflow_id: String,
        action: String,
    },
    Finished {
        workflow_id: String,
        status: WorkflowStatus,
    },
    Failed {
        workflow_id: String,
        error: String,
    },
}

impl WorkflowEvent {
    pub fn workflow_id(&self) -> &str {
        match self {
            WorkflowEvent::Step { workflow_id, .. }
            | WorkflowEvent::Suspended { workflow_id, .. }
            | WorkflowEvent::Resumed { workflow_id, .. }
            | WorkflowEvent::Finished { workflow_id, .. }
            | WorkflowEvent::Failed { workflow_id, .. } => workflow_id,
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: WorkflowEvent);
}

/// No-op reporter for unit tests and hosts that do not listen.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: WorkflowEvent) {}
}

/// Forwards events to a tokio broadcast channel.
pub struct BroadcastProgress {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: WorkflowEvent) {
        if let Err(e) = self.sender.send(event) {
            tracing::trace!("No progress listeners active: {}", e);
        }
    }
}
