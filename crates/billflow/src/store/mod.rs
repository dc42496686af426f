//! Checkpoint and token persistence.
//!
//! The store is the only shared mutable state in the system. Writes are
//! limited to creating checkpoints, creating tokens and flipping `consumed`
//! flags. Every consume runs as one atomic unit, so of two concurrent
//! attempts only one succeeds.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkpoint::WorkflowStep;

pub use memory::MemoryStore;

/// Durable snapshot of a workflow at a suspension point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub id: String,
    pub workflow_id: String,
    pub step: WorkflowStep,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub consumed: bool,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl WorkflowCheckpoint {
    pub fn new(
        workflow_id: &str,
        step: WorkflowStep,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            step,
            payload,
            created_at,
            consumed: false,
            consumed_at: None,
        }
    }
}

/// Stored form of a resume token. Only the hash of the token value is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeTokenRecord {
    pub token_hash: String,
    pub workflow_id: String,
    pub checkpoint_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl ResumeTokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Workflow '{workflow_id}' already has an unconsumed checkpoint")]
    DuplicateCheckpoint { workflow_id: String },

    #[error("Checkpoint '{checkpoint_id}' not found or already consumed")]
    CheckpointNotFound { checkpoint_id: String },

    #[error("Resume token not found")]
    TokenNotFound,

    #[error("Resume token expired at {expires_at}")]
    TokenExpired { expires_at: DateTime<Utc> },

    #[error("Resume token already consumed")]
    TokenAlreadyConsumed,

    #[error("Resume token already exists")]
    DuplicateToken,

    #[error("Checkpoint '{checkpoint_id}' payload rejected: {reason}")]
    InvalidPayload {
        checkpoint_id: String,
        reason: String,
    },

    #[error("Token lifetime of {ttl_secs}s puts its expiry out of range")]
    ExpiryOutOfRange { ttl_secs: i64 },

    #[error("Failed to (de)serialize stored record: {0}")]
    Serialization(String),

    #[error("Storage backend error: {message}")]
    Backend { message: String, retryable: bool },
}

impl StoreError {
    /// Transient backend failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Backend { retryable: true, .. })
    }
}

/// Check run on a checkpoint inside `consume_for_resume`, before anything
/// is marked consumed. An `Err` aborts the resume with `InvalidPayload`.
pub type CheckpointCheck = Arc<dyn Fn(&WorkflowCheckpoint) -> Result<(), String> + Send + Sync>;

/// A [`CheckpointCheck`] that accepts every checkpoint.
pub fn accept_any_checkpoint() -> CheckpointCheck {
    Arc::new(|_: &WorkflowCheckpoint| -> Result<(), String> { Ok(()) })
}

/// Checkpoint and token storage.
///
/// Implementations must be safe to share between tasks. The consume
/// methods check and flip flags in a single atomic step.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    /// Fails with `DuplicateCheckpoint` when the workflow already has a live
    /// checkpoint.
    async fn insert_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> Result<(), StoreError>;

    async fn get_checkpoint(&self, id: &str) -> Result<Option<WorkflowCheckpoint>, StoreError>;

    /// The unconsumed checkpoint of a workflow, if any.
    async fn live_checkpoint(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowCheckpoint>, StoreError>;

    /// All checkpoints of a workflow, oldest first, consumed ones included.
    async fn list_checkpoints(&self, workflow_id: &str)
        -> Result<Vec<WorkflowCheckpoint>, StoreError>;

    async fn insert_token(&self, token: &ResumeTokenRecord) -> Result<(), StoreError>;

    /// Inserts a checkpoint and the token pointing at it as one unit. On any
    /// error neither is stored.
    async fn insert_checkpoint_with_token(
        &self,
        checkpoint: &WorkflowCheckpoint,
        token: &ResumeTokenRecord,
    ) -> Result<(), StoreError>;

    /// Marks a token consumed.
    ///
    /// Errors, in order of precedence: `TokenNotFound`, `TokenExpired`,
    /// `TokenAlreadyConsumed`. An expired token is never marked consumed.
    async fn consume_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<ResumeTokenRecord, StoreError>;

    /// Marks a token and its checkpoint consumed together.
    ///
    /// Same token errors as `consume_token`, then `CheckpointNotFound` when
    /// the checkpoint is missing or already consumed, then `InvalidPayload`
    /// when `check` refuses the checkpoint. Nothing changes on error.
    async fn consume_for_resume(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        check: CheckpointCheck,
    ) -> Result<(ResumeTokenRecord, WorkflowCheckpoint), StoreError>;
}

/// Token checks shared by every backend, in precedence order.
pub(crate) fn check_token(
    token: Option<&ResumeTokenRecord>,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let token = token.ok_or(StoreError::TokenNotFound)?;
    if token.is_expired_at(now) {
        return Err(StoreError::TokenExpired {
            expires_at: token.expires_at,
        });
    }
    if token.consumed {
        return Err(StoreError::TokenAlreadyConsumed);
    }
    Ok(())
}

pub(crate) fn check_checkpoint(
    check: &CheckpointCheck,
    checkpoint: &WorkflowCheckpoint,
) -> Result<(), StoreError> {
    check(checkpoint).map_err(|reason| StoreError::InvalidPayload {
        checkpoint_id: checkpoint.id.clone(),
        reason,
    })
}
