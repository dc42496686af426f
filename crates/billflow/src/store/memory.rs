use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{
    check_checkpoint, check_token, CheckpointCheck, ResumeTokenRecord, StoreError,
    WorkflowCheckpoint, WorkflowStore,
};

#[derive(Default)]
struct Inner {
    checkpoints: HashMap<String, WorkflowCheckpoint>,
    /// Checkpoint ids per workflow, in insertion order.
    by_workflow: HashMap<String, Vec<String>>,
    tokens: HashMap<String, ResumeTokenRecord>,
}

impl Inner {
    fn live_checkpoint(&self, workflow_id: &str) -> Option<&WorkflowCheckpoint> {
        self.by_workflow
            .get(workflow_id)?
            .iter()
            .filter_map(|id| self.checkpoints.get(id))
            .find(|cp| !cp.consumed)
    }

    fn check_new_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> Result<(), StoreError> {
        if self.live_checkpoint(&checkpoint.workflow_id).is_some() {
            return Err(StoreError::DuplicateCheckpoint {
                workflow_id: checkpoint.workflow_id.clone(),
            });
        }
        Ok(())
    }

    fn check_new_token(&self, token: &ResumeTokenRecord) -> Result<(), StoreError> {
        if self.tokens.contains_key(&token.token_hash) {
            return Err(StoreError::DuplicateToken);
        }
        Ok(())
    }

    fn put_checkpoint(&mut self, checkpoint: &WorkflowCheckpoint) {
        self.by_workflow
            .entry(checkpoint.workflow_id.clone())
            .or_default()
            .push(checkpoint.id.clone());
        self.checkpoints
            .insert(checkpoint.id.clone(), checkpoint.clone());
    }
}

/// In-process store. Every operation holds one mutex for its whole
/// check-and-set, which is what makes the consume methods atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn insert_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_new_checkpoint(checkpoint)?;
        inner.put_checkpoint(checkpoint);
        Ok(())
    }

    async fn get_checkpoint(&self, id: &str) -> Result<Option<WorkflowCheckpoint>, StoreError> {
        Ok(self.inner.lock().await.checkpoints.get(id).cloned())
    }

    async fn live_checkpoint(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowCheckpoint>, StoreError> {
        Ok(self.inner.lock().await.live_checkpoint(workflow_id).cloned())
    }

    async fn list_checkpoints(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowCheckpoint>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_workflow
            .get(workflow_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.checkpoints.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_token(&self, token: &ResumeTokenRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_new_token(token)?;
        inner.tokens.insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn insert_checkpoint_with_token(
        &self,
        checkpoint: &WorkflowCheckpoint,
        token: &ResumeTokenRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_new_checkpoint(checkpoint)?;
        inner.check_new_token(token)?;

        inner.put_checkpoint(checkpoint);
        inner.tokens.insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn consume_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<ResumeTokenRecord, StoreError> {
        let mut inner = self.inner.lock().await;

        check_token(inner.tokens.get(token_hash), now)?;

        let token = inner
            .tokens
            .get_mut(token_hash)
            .ok_or(StoreError::TokenNotFound)?;
        token.consumed = true;
        token.consumed_at = Some(now);
        Ok(token.clone())
    }

    async fn consume_for_resume(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        check: CheckpointCheck,
    ) -> Result<(ResumeTokenRecord, WorkflowCheckpoint), StoreError> {
        let mut inner = self.inner.lock().await;

        check_token(inner.tokens.get(token_hash), now)?;

        let checkpoint_id = inner
            .tokens
            .get(token_hash)
            .map(|t| t.checkpoint_id.clone())
            .ok_or(StoreError::TokenNotFound)?;

        let not_found = || StoreError::CheckpointNotFound {
            checkpoint_id: checkpoint_id.clone(),
        };
        let live = inner
            .checkpoints
            .get(&checkpoint_id)
            .filter(|cp| !cp.consumed)
            .ok_or_else(not_found)?;
        check_checkpoint(&check, live)?;

        let checkpoint = inner
            .checkpoints
            .get_mut(&checkpoint_id)
            .ok_or_else(not_found)?;
        checkpoint.consumed = true;
        checkpoint.consumed_at = Some(now);
        let checkpoint = checkpoint.clone();

        let token = inner
            .tokens
            .get_mut(token_hash)
            .ok_or(StoreError::TokenNotFound)?;
        token.consumed = true;
        token.consumed_at = Some(now);

        Ok((token.clone(), checkpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::WorkflowStep;
    use crate::store::accept_any_checkpoint;
    use chrono::Duration;
    use std::sync::Arc;

    fn checkpoint(workflow_id: &str) -> WorkflowCheckpoint {
        WorkflowCheckpoint::new(
            workflow_id,
            WorkflowStep::HumanReview,
            serde_json::json!({ "step": "human_review" }),
            Utc::now(),
        )
    }

    fn token_for(cp: &WorkflowCheckpoint, hash: &str, ttl_secs: i64) -> ResumeTokenRecord {
        let now = Utc::now();
        ResumeTokenRecord {
            token_hash: hash.to_string(),
            workflow_id: cp.workflow_id.clone(),
            checkpoint_id: cp.id.clone(),
            created_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
            consumed: false,
            consumed_at: None,
        }
    }

    #[tokio::test]
    async fn test_second_live_checkpoint_rejected() {
        let store = MemoryStore::new();
        store.insert_checkpoint(&checkpoint("wf-1")).await.unwrap();

        match store.insert_checkpoint(&checkpoint("wf-1")).await {
            Err(StoreError::DuplicateCheckpoint { workflow_id }) => assert_eq!(workflow_id, "wf-1"),
            other => panic!("Expected DuplicateCheckpoint, got {:?}", other),
        }

        // Other workflows are independent.
        store.insert_checkpoint(&checkpoint("wf-2")).await.unwrap();
    }

    #[tokio::test]
    async fn test_consume_for_resume_flips_both_flags() {
        let store = MemoryStore::new();
        let cp = checkpoint("wf-1");
        store.insert_checkpoint(&cp).await.unwrap();
        store.insert_token(&token_for(&cp, "h1", 60)).await.unwrap();

        let (token, resumed) = store
            .consume_for_resume("h1", Utc::now(), accept_any_checkpoint())
            .await
            .unwrap();
        assert!(token.consumed);
        assert!(resumed.consumed);
        assert_eq!(resumed.id, cp.id);

        assert!(store.live_checkpoint("wf-1").await.unwrap().is_none());
        let history = store.list_checkpoints("wf-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].consumed_at.is_some());

        // A new checkpoint is allowed once the old one is consumed.
        store.insert_checkpoint(&checkpoint("wf-1")).await.unwrap();
        assert_eq!(store.list_checkpoints("wf-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_second_resume_reports_consumed() {
        let store = MemoryStore::new();
        let cp = checkpoint("wf-1");
        store.insert_checkpoint(&cp).await.unwrap();
        store.insert_token(&token_for(&cp, "h1", 60)).await.unwrap();

        store
            .consume_for_resume("h1", Utc::now(), accept_any_checkpoint())
            .await
            .unwrap();
        assert!(matches!(
            store.consume_for_resume("h1", Utc::now(), accept_any_checkpoint()).await,
            Err(StoreError::TokenAlreadyConsumed)
        ));
    }

    #[tokio::test]
    async fn test_missing_checkpoint_leaves_token_unconsumed() {
        let store = MemoryStore::new();
        let cp = checkpoint("wf-1");
        store.insert_token(&token_for(&cp, "h1", 60)).await.unwrap();

        assert!(matches!(
            store.consume_for_resume("h1", Utc::now(), accept_any_checkpoint()).await,
            Err(StoreError::CheckpointNotFound { .. })
        ));
        // Still redeemable as a bare token.
        assert!(store.consume_token("h1", Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_token_stays_expired() {
        let store = MemoryStore::new();
        let cp = checkpoint("wf-1");
        store.insert_checkpoint(&cp).await.unwrap();
        store.insert_token(&token_for(&cp, "h1", 60)).await.unwrap();

        let later = Utc::now() + Duration::hours(2);
        for _ in 0..2 {
            assert!(matches!(
                store.consume_for_resume("h1", later, accept_any_checkpoint()).await,
                Err(StoreError::TokenExpired { .. })
            ));
        }
        assert!(store.live_checkpoint("wf-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_token_hash_rejected() {
        let store = MemoryStore::new();
        let cp = checkpoint("wf-1");
        store.insert_token(&token_for(&cp, "h1", 60)).await.unwrap();
        assert!(matches!(
            store.insert_token(&token_for(&cp, "h1", 60)).await,
            Err(StoreError::DuplicateToken)
        ));
    }

    #[tokio::test]
    async fn test_checkpoint_with_token_is_all_or_nothing() {
        let store = MemoryStore::new();
        let first = checkpoint("wf-1");
        store
            .insert_checkpoint_with_token(&first, &token_for(&first, "h1", 60))
            .await
            .unwrap();

        // Same token hash for another workflow: neither record lands.
        let second = checkpoint("wf-2");
        assert!(matches!(
            store
                .insert_checkpoint_with_token(&second, &token_for(&second, "h1", 60))
                .await,
            Err(StoreError::DuplicateToken)
        ));
        assert!(store.live_checkpoint("wf-2").await.unwrap().is_none());
        assert!(store.list_checkpoints("wf-2").await.unwrap().is_empty());

        // A live checkpoint blocks the pair, and its token is not stored.
        let again = checkpoint("wf-1");
        assert!(matches!(
            store
                .insert_checkpoint_with_token(&again, &token_for(&again, "h2", 60))
                .await,
            Err(StoreError::DuplicateCheckpoint { .. })
        ));
        assert!(matches!(
            store.consume_token("h2", Utc::now()).await,
            Err(StoreError::TokenNotFound)
        ));
    }

    #[tokio::test]
    async fn test_refused_payload_consumes_nothing() {
        let store = MemoryStore::new();
        let cp = checkpoint("wf-1");
        store
            .insert_checkpoint_with_token(&cp, &token_for(&cp, "h1", 60))
            .await
            .unwrap();

        let refuse: CheckpointCheck =
            Arc::new(|_: &WorkflowCheckpoint| -> Result<(), String> {
                Err("missing field `workflow_id`".to_string())
            });
        match store.consume_for_resume("h1", Utc::now(), refuse).await {
            Err(StoreError::InvalidPayload {
                checkpoint_id,
                reason,
            }) => {
                assert_eq!(checkpoint_id, cp.id);
                assert!(reason.contains("workflow_id"));
            }
            other => panic!("Expected InvalidPayload, got {:?}", other),
        }

        assert!(store.live_checkpoint("wf-1").await.unwrap().is_some());
        let (token, _) = store
            .consume_for_resume("h1", Utc::now(), accept_any_checkpoint())
            .await
            .unwrap();
        assert!(token.consumed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resume_exactly_one_wins() {
        let store = Arc::new(MemoryStore::new());
        let cp = checkpoint("wf-1");
        store.insert_checkpoint(&cp).await.unwrap();
        store.insert_token(&token_for(&cp, "h1", 60)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                s.consume_for_resume("h1", Utc::now(), accept_any_checkpoint())
                    .await
            }));
        }

        let mut winners = 0;
        let mut consumed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(StoreError::TokenAlreadyConsumed) => consumed += 1,
                Err(e) => panic!("Unexpected error: {}", e),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(consumed, 9);
    }
}
