//! Hand-off to whatever tells a reviewer that an invoice needs attention.
//!
//! The notifier receives the opaque token and display fields only. It never
//! sees workflow or checkpoint ids.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::sanitize;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Review request could not be delivered: {0}")]
    Delivery(String),
}

/// Display fields for the reviewer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewSummary {
    pub filename: String,
    pub vendor: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub total: Option<String>,
    pub currency: Option<String>,
    pub confidence: f64,
    /// Why review is needed, in reviewer language.
    pub reasons: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ReviewRequest {
    pub token: SecretString,
    pub summary: ReviewSummary,
}

#[async_trait]
pub trait ReviewNotifier: Send + Sync + 'static {
    async fn notify(&self, request: ReviewRequest) -> Result<(), NotifyError>;
}

/// Logs review requests with the token redacted. Useful when nothing
/// downstream is wired up yet.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl ReviewNotifier for LogNotifier {
    async fn notify(&self, request: ReviewRequest) -> Result<(), NotifyError> {
        use secrecy::ExposeSecret;

        tracing::info!(
            filename = %request.summary.filename,
            total = request.summary.total.as_deref().unwrap_or("-"),
            confidence = request.summary.confidence,
            token = %sanitize::redact_token(request.token.expose_secret()),
            expires_at = %request.summary.expires_at,
            "Review requested"
        );
        Ok(())
    }
}

/// Publishes review requests on a tokio broadcast channel.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Arc<ReviewRequest>>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ReviewRequest>> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ReviewNotifier for BroadcastNotifier {
    async fn notify(&self, request: ReviewRequest) -> Result<(), NotifyError> {
        self.sender
            .send(Arc::new(request))
            .map(|_| ())
            .map_err(|_| NotifyError::Delivery("no subscribers".to_string()))
    }
}
