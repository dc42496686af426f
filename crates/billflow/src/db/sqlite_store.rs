//! SQLite implementation of [`WorkflowStore`].
//!
//! Blocking rusqlite calls run on the blocking pool. Busy/locked errors are
//! retried with exponential backoff.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{checkpoint_repo, token_repo, Database, DatabaseError};
use crate::store::{
    check_checkpoint, check_token, CheckpointCheck, ResumeTokenRecord, StoreError,
    WorkflowCheckpoint, WorkflowStore,
};

/// Maximum number of retries for transient errors.
const MAX_RETRIES: u32 = 3;
/// Base delay for exponential backoff.
const RETRY_BASE_DELAY_MS: u64 = 50;

/// Durable store backed by a SQLite file.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn run<F, T>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        F: Fn(&Database) -> Result<T, StoreError> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let f = Arc::new(f);
        let mut attempt = 0;

        loop {
            let db = self.db.clone();
            let call = f.clone();
            let result = tokio::task::spawn_blocking(move || call(&db))
                .await
                .map_err(|e| StoreError::Backend {
                    message: format!("{} task failed: {}", op, e),
                    retryable: false,
                })?;

            match result {
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY_MS * (1 << (attempt - 1));
                    log::warn!(
                        "{} failed with retryable error (attempt {}/{}), retrying in {}ms: {}",
                        op,
                        attempt,
                        MAX_RETRIES + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                other => return other,
            }
        }
    }
}

fn checkpoint_insert_error(err: DatabaseError, workflow_id: &str) -> StoreError {
    if err.is_constraint_violation() {
        StoreError::DuplicateCheckpoint {
            workflow_id: workflow_id.to_string(),
        }
    } else {
        err.into()
    }
}

fn token_insert_error(err: DatabaseError) -> StoreError {
    if err.is_constraint_violation() {
        StoreError::DuplicateToken
    } else {
        err.into()
    }
}

#[async_trait]
impl WorkflowStore for SqliteStore {
    async fn insert_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> Result<(), StoreError> {
        let checkpoint = checkpoint.clone();
        self.run("insert_checkpoint", move |db| {
            db.with_conn(|conn| checkpoint_repo::insert(conn, &checkpoint))
                .map_err(|e| checkpoint_insert_error(e, &checkpoint.workflow_id))
        })
        .await
    }

    async fn get_checkpoint(&self, id: &str) -> Result<Option<WorkflowCheckpoint>, StoreError> {
        let id = id.to_string();
        self.run("get_checkpoint", move |db| {
            Ok(db.with_conn(|conn| checkpoint_repo::find_by_id(conn, &id))?)
        })
        .await
    }

    async fn live_checkpoint(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowCheckpoint>, StoreError> {
        let workflow_id = workflow_id.to_string();
        self.run("live_checkpoint", move |db| {
            Ok(db.with_conn(|conn| checkpoint_repo::find_live(conn, &workflow_id))?)
        })
        .await
    }

    async fn list_checkpoints(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowCheckpoint>, StoreError> {
        let workflow_id = workflow_id.to_string();
        self.run("list_checkpoints", move |db| {
            Ok(db.with_conn(|conn| checkpoint_repo::list_for_workflow(conn, &workflow_id))?)
        })
        .await
    }

    async fn insert_token(&self, token: &ResumeTokenRecord) -> Result<(), StoreError> {
        let token = token.clone();
        self.run("insert_token", move |db| {
            db.with_conn(|conn| token_repo::insert(conn, &token))
                .map_err(token_insert_error)
        })
        .await
    }

    async fn insert_checkpoint_with_token(
        &self,
        checkpoint: &WorkflowCheckpoint,
        token: &ResumeTokenRecord,
    ) -> Result<(), StoreError> {
        let checkpoint = checkpoint.clone();
        let token = token.clone();
        self.run("insert_checkpoint_with_token", move |db| {
            db.with_transaction(|tx| {
                checkpoint_repo::insert(tx, &checkpoint)
                    .map_err(|e| checkpoint_insert_error(e, &checkpoint.workflow_id))?;
                token_repo::insert(tx, &token).map_err(token_insert_error)
            })
        })
        .await
    }

    async fn consume_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<ResumeTokenRecord, StoreError> {
        let token_hash = token_hash.to_string();
        self.run("consume_token", move |db| {
            db.with_transaction(|tx| {
                let token = token_repo::find(tx, &token_hash)?;
                check_token(token.as_ref(), now)?;
                if !token_repo::mark_consumed(tx, &token_hash, &now)? {
                    return Err(StoreError::TokenAlreadyConsumed);
                }
                token_repo::find(tx, &token_hash)?.ok_or(StoreError::TokenNotFound)
            })
        })
        .await
    }

    async fn consume_for_resume(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        check: CheckpointCheck,
    ) -> Result<(ResumeTokenRecord, WorkflowCheckpoint), StoreError> {
        let token_hash = token_hash.to_string();
        self.run("consume_for_resume", move |db| {
            db.with_transaction(|tx| {
                let token = token_repo::find(tx, &token_hash)?;
                check_token(token.as_ref(), now)?;
                let token = token.ok_or(StoreError::TokenNotFound)?;

                let not_found = || StoreError::CheckpointNotFound {
                    checkpoint_id: token.checkpoint_id.clone(),
                };
                let live = checkpoint_repo::find_by_id(tx, &token.checkpoint_id)?
                    .filter(|cp| !cp.consumed)
                    .ok_or_else(not_found)?;
                check_checkpoint(&check, &live)?;

                if !checkpoint_repo::mark_consumed(tx, &token.checkpoint_id, &now)? {
                    return Err(not_found());
                }
                if !token_repo::mark_consumed(tx, &token_hash, &now)? {
                    return Err(StoreError::TokenAlreadyConsumed);
                }

                let token = token_repo::find(tx, &token_hash)?.ok_or(StoreError::TokenNotFound)?;
                let checkpoint =
                    checkpoint_repo::find_by_id(tx, &token.checkpoint_id)?.ok_or_else(not_found)?;
                Ok((token, checkpoint))
            })
        })
        .await
    }
}
