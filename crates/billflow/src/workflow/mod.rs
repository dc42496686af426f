pub mod notify;
pub mod progress;
pub mod runner;
pub mod state;

pub use notify::{
    BroadcastNotifier, LogNotifier, NotifyError, ReviewNotifier, ReviewRequest, ReviewSummary,
};
pub use progress::{BroadcastProgress, NoopProgress, ProgressReporter, WorkflowEvent};
pub use runner::{Pipeline, WorkflowOutcome};
pub use state::{WorkflowState, WorkflowStatus};
