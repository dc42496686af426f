//! Durable suspension at the human-review boundary.
//!
//! `suspend` persists a checkpoint and returns. `resume` is a fresh call that
//! redeems a token and hands back the stored payload; nothing stays in
//! memory between the two.

pub mod step;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Instrument;

use crate::store::{
    accept_any_checkpoint, CheckpointCheck, StoreError, WorkflowCheckpoint, WorkflowStore,
};
use crate::token::{hash_token, IssuedToken, TokenService};

pub use step::WorkflowStep;

/// Resume and suspend failures. Every variant except `Storage` is terminal:
/// retrying with the same token cannot succeed.
#[derive(Error, Debug)]
pub enum ResumeError {
    #[error("Resume token not found")]
    TokenNotFound,

    #[error("Resume token expired at {expires_at}")]
    TokenExpired { expires_at: DateTime<Utc> },

    #[error("Resume token already used")]
    TokenAlreadyConsumed,

    #[error("Checkpoint '{checkpoint_id}' not found or already consumed")]
    CheckpointNotFound { checkpoint_id: String },

    #[error("Workflow '{workflow_id}' is already suspended")]
    DuplicateCheckpoint { workflow_id: String },

    #[error("Checkpoint payload could not be read: {0}")]
    InvalidCheckpoint(String),

    #[error("Review window of {ttl_secs}s is out of range")]
    InvalidTtl { ttl_secs: i64 },

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for ResumeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TokenNotFound => ResumeError::TokenNotFound,
            StoreError::TokenExpired { expires_at } => ResumeError::TokenExpired { expires_at },
            StoreError::TokenAlreadyConsumed => ResumeError::TokenAlreadyConsumed,
            StoreError::CheckpointNotFound { checkpoint_id } => {
                ResumeError::CheckpointNotFound { checkpoint_id }
            }
            StoreError::DuplicateCheckpoint { workflow_id } => {
                ResumeError::DuplicateCheckpoint { workflow_id }
            }
            StoreError::InvalidPayload { reason, .. } => ResumeError::InvalidCheckpoint(reason),
            StoreError::ExpiryOutOfRange { ttl_secs } => ResumeError::InvalidTtl { ttl_secs },
            other => ResumeError::Storage(other),
        }
    }
}

impl ResumeError {
    /// Stable code for the reviewer-facing boundary.
    pub fn code(&self) -> &'static str {
        match self {
            ResumeError::TokenNotFound => "token_not_found",
            ResumeError::TokenExpired { .. } => "token_expired",
            ResumeError::TokenAlreadyConsumed => "token_already_used",
            ResumeError::CheckpointNotFound { .. } => "checkpoint_not_found",
            ResumeError::DuplicateCheckpoint { .. } => "duplicate_checkpoint",
            ResumeError::InvalidCheckpoint(_) => "checkpoint_invalid",
            ResumeError::InvalidTtl { .. } => "review_ttl_invalid",
            ResumeError::Storage(_) => "storage_unavailable",
        }
    }

    /// Text shown to the reviewer. Never contains internal ids.
    pub fn user_message(&self) -> &'static str {
        match self {
            ResumeError::TokenNotFound => "This link is not valid. Please use the link from your most recent notification.",
            ResumeError::TokenExpired { .. } => "This link has expired. Please request a new one.",
            ResumeError::TokenAlreadyConsumed | ResumeError::CheckpointNotFound { .. } => {
                "This invoice has already been processed."
            }
            ResumeError::DuplicateCheckpoint { .. } => "This invoice is already waiting for review.",
            ResumeError::InvalidCheckpoint(_)
            | ResumeError::InvalidTtl { .. }
            | ResumeError::Storage(_) => {
                "Something went wrong on our side. Please try again later."
            }
        }
    }

    /// Only storage outages may succeed on a later attempt.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResumeError::Storage(_))
    }
}

/// What the reviewer decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReviewerAction {
    Approve,
    Modify {
        #[serde(default)]
        feedback: Option<String>,
        #[serde(default)]
        corrections: BTreeMap<String, String>,
    },
    Reject {
        reason: String,
    },
}

impl ReviewerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewerAction::Approve => "approve",
            ReviewerAction::Modify { .. } => "modify",
            ReviewerAction::Reject { .. } => "reject",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeOutcome {
    ResumedApproved,
    ResumedModified,
    ResumedRejected,
}

/// Changes to apply to the stored state before continuing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdates {
    pub feedback: Option<String>,
    pub corrections: BTreeMap<String, String>,
    pub rejection_reason: Option<String>,
}

impl StateUpdates {
    pub fn is_empty(&self) -> bool {
        self.feedback.is_none() && self.corrections.is_empty() && self.rejection_reason.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResumePlan {
    /// Step to continue from. For a rejection this is the suspended step
    /// itself and nothing runs.
    pub next_step: WorkflowStep,
    pub state_updates: StateUpdates,
    pub outcome: ResumeOutcome,
}

impl ResumePlan {
    pub fn is_terminal(&self) -> bool {
        self.outcome == ResumeOutcome::ResumedRejected
    }
}

/// Decides where a resumed workflow continues.
///
/// Approve continues after the suspension point. Modify goes back to the
/// merge step so the corrected fields are validated again. Reject stops at
/// the current step.
pub fn plan_resume(action: &ReviewerAction, suspended_at: WorkflowStep) -> ResumePlan {
    match action {
        ReviewerAction::Approve => ResumePlan {
            next_step: suspended_at.next().unwrap_or(suspended_at),
            state_updates: StateUpdates::default(),
            outcome: ResumeOutcome::ResumedApproved,
        },
        ReviewerAction::Modify {
            feedback,
            corrections,
        } => ResumePlan {
            next_step: WorkflowStep::MergeExtraction,
            state_updates: StateUpdates {
                feedback: feedback.clone(),
                corrections: corrections.clone(),
                rejection_reason: None,
            },
            outcome: ResumeOutcome::ResumedModified,
        },
        ReviewerAction::Reject { reason } => ResumePlan {
            next_step: suspended_at,
            state_updates: StateUpdates {
                rejection_reason: Some(reason.clone()),
                ..StateUpdates::default()
            },
            outcome: ResumeOutcome::ResumedRejected,
        },
    }
}

/// A checkpoint that has just been consumed by a successful resume.
#[derive(Debug, Clone)]
pub struct ResumedCheckpoint {
    pub checkpoint: WorkflowCheckpoint,
    pub resumed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ResumeController {
    store: Arc<dyn WorkflowStore>,
    tokens: TokenService,
}

impl ResumeController {
    pub fn new(store: Arc<dyn WorkflowStore>, tokens: TokenService) -> Self {
        Self { store, tokens }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Persists a checkpoint for `workflow_id`.
    pub async fn suspend(
        &self,
        workflow_id: &str,
        step: WorkflowStep,
        payload: serde_json::Value,
    ) -> Result<WorkflowCheckpoint, ResumeError> {
        let span = tracing::info_span!("suspend", workflow_id, step = %step);
        async {
            let checkpoint = WorkflowCheckpoint::new(workflow_id, step, payload, self.tokens.now());
            self.store.insert_checkpoint(&checkpoint).await?;
            tracing::info!(checkpoint_id = %checkpoint.id, "Workflow suspended");
            Ok::<_, ResumeError>(checkpoint)
        }
        .instrument(span)
        .await
    }

    /// Suspends and issues the token a reviewer will use to resume.
    ///
    /// The checkpoint and its token are stored together. On error neither
    /// exists and the workflow can be suspended again.
    pub async fn suspend_for_review(
        &self,
        workflow_id: &str,
        step: WorkflowStep,
        payload: serde_json::Value,
        ttl: Duration,
    ) -> Result<(WorkflowCheckpoint, IssuedToken), ResumeError> {
        let span = tracing::info_span!("suspend", workflow_id, step = %step);
        async {
            let checkpoint = WorkflowCheckpoint::new(workflow_id, step, payload, self.tokens.now());
            let (token, record) = self.tokens.mint(workflow_id, &checkpoint.id, ttl)?;

            self.store
                .insert_checkpoint_with_token(&checkpoint, &record)
                .await
                .inspect_err(|e| tracing::error!(error = %e, "Failed to store checkpoint and token"))?;

            tracing::info!(checkpoint_id = %checkpoint.id, expires_at = %token.expires_at, "Workflow suspended for review");
            Ok::<_, ResumeError>((checkpoint, token))
        }
        .instrument(span)
        .await
    }

    /// Redeems `token` and consumes its checkpoint in one atomic step.
    pub async fn resume(&self, token: &str) -> Result<ResumedCheckpoint, ResumeError> {
        self.resume_checked(token, accept_any_checkpoint()).await
    }

    /// Like [`resume`](Self::resume), but `check` must accept the
    /// checkpoint before anything is consumed. A refused checkpoint leaves
    /// the token redeemable and fails with `InvalidCheckpoint`.
    pub async fn resume_checked(
        &self,
        token: &str,
        check: CheckpointCheck,
    ) -> Result<ResumedCheckpoint, ResumeError> {
        let span = tracing::info_span!(
            "resume",
            token = %crate::sanitize::redact_token(token),
            workflow_id = tracing::field::Empty
        );
        async {
            let now = self.tokens.now();
            let (_, checkpoint) = self
                .store
                .consume_for_resume(&hash_token(token), now, check)
                .await
                .inspect_err(|e| tracing::warn!(error = %e, "Resume refused"))?;

            tracing::Span::current().record("workflow_id", checkpoint.workflow_id.as_str());
            tracing::info!(checkpoint_id = %checkpoint.id, step = %checkpoint.step, "Checkpoint resumed");

            Ok::<_, ResumeError>(ResumedCheckpoint {
                checkpoint,
                resumed_at: now,
            })
        }
        .instrument(span)
        .await
    }

    pub async fn history(&self, workflow_id: &str) -> Result<Vec<WorkflowCheckpoint>, ResumeError> {
        Ok(self.store.list_checkpoints(workflow_id).await?)
    }
}
