pub mod checkpoint;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod extraction;
pub mod routing;
pub mod sanitize;
pub mod store;
pub mod token;
pub mod validation;
pub mod workflow;

pub use checkpoint::{
    plan_resume, ResumeController, ResumeError, ResumeOutcome, ResumePlan, ReviewerAction,
    WorkflowStep,
};
pub use config::{load_config, Config, DocumentFormat};
pub use db::{Database, DatabaseError, SqliteStore};
pub use document::{Document, DocumentSummary};
pub use error::{BillflowError, ConfigError, ExtractionError, InputError, Result};
pub use extraction::{ExtractionEngine, ExtractionMethod, ExtractionResult};
pub use routing::{ApprovalDecision, ApprovalRouter, Decision, ReasonCode, RoutingThresholds};
pub use store::{MemoryStore, ResumeTokenRecord, StoreError, WorkflowCheckpoint, WorkflowStore};
pub use token::{Clock, IssuedToken, ManualClock, SystemClock, TokenService};
pub use validation::{ValidationResult, Validator, Violation};
pub use workflow::{
    BroadcastNotifier, LogNotifier, Pipeline, ReviewNotifier, ReviewRequest, WorkflowOutcome,
    WorkflowState,
};
