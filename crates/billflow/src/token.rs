//! Single-use resume tokens.
//!
//! A token is 32 random bytes, URL-safe base64 encoded. Only its SHA-256
//! hash is persisted, so a leaked database cannot be used to resume
//! workflows. The plaintext value is handed out once, wrapped in
//! [`SecretString`].

use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::store::{ResumeTokenRecord, StoreError, WorkflowStore};

const TOKEN_BYTES: usize = 32;

/// Source of the current time. Swapped out in tests to move past expiry.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A freshly issued token. The value is never stored.
#[derive(Debug)]
pub struct IssuedToken {
    pub value: SecretString,
    pub expires_at: DateTime<Utc>,
}

/// Where a redeemed token points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemedToken {
    pub workflow_id: String,
    pub checkpoint_id: String,
}

/// Hex-encoded SHA-256 of a token value.
pub fn hash_token(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn generate_token_value() -> Result<String, StoreError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::fill(&mut bytes).map_err(|e| StoreError::Backend {
        message: format!("Failed to generate random bytes: {}", e),
        retryable: false,
    })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Issues and redeems resume tokens against a [`WorkflowStore`].
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(store: Arc<dyn WorkflowStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Builds a token bound to one checkpoint, valid for `ttl`, without
    /// storing it. The record goes to the store, the value to the reviewer.
    pub fn mint(
        &self,
        workflow_id: &str,
        checkpoint_id: &str,
        ttl: Duration,
    ) -> Result<(IssuedToken, ResumeTokenRecord), StoreError> {
        let created_at = self.clock.now();
        let expires_at = created_at
            .checked_add_signed(ttl)
            .ok_or(StoreError::ExpiryOutOfRange {
                ttl_secs: ttl.num_seconds(),
            })?;
        let value = generate_token_value()?;

        let record = ResumeTokenRecord {
            token_hash: hash_token(&value),
            workflow_id: workflow_id.to_string(),
            checkpoint_id: checkpoint_id.to_string(),
            created_at,
            expires_at,
            consumed: false,
            consumed_at: None,
        };
        let issued = IssuedToken {
            value: SecretString::from(value),
            expires_at,
        };
        Ok((issued, record))
    }

    /// Creates and stores a token for an existing checkpoint.
    pub async fn issue(
        &self,
        workflow_id: &str,
        checkpoint_id: &str,
        ttl: Duration,
    ) -> Result<IssuedToken, StoreError> {
        let (issued, record) = self.mint(workflow_id, checkpoint_id, ttl)?;
        self.store.insert_token(&record).await?;

        tracing::debug!(workflow_id, checkpoint_id, expires_at = %issued.expires_at, "Issued resume token");
        Ok(issued)
    }

    /// Redeems a token on its own, without touching the checkpoint.
    ///
    /// Fails with `TokenNotFound`, `TokenExpired` or `TokenAlreadyConsumed`,
    /// checked in that order.
    pub async fn redeem(&self, value: &str) -> Result<RedeemedToken, StoreError> {
        let record = self
            .store
            .consume_token(&hash_token(value), self.clock.now())
            .await?;
        Ok(RedeemedToken {
            workflow_id: record.workflow_id,
            checkpoint_id: record.checkpoint_id,
        })
    }
}

/// Convenience for callers that hold the token as a [`SecretString`].
pub fn expose(token: &SecretString) -> &str {
    token.expose_secret()
}
