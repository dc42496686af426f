//! Isolated pipeline setup for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use billflow::config::schema::Config;
use billflow::extraction::{EngineSettings, ExtractionEngine, ExtractionStrategy};
use billflow::token::expose;
use billflow::workflow::{NotifyError, ReviewNotifier, ReviewRequest, ReviewSummary};
use billflow::{
    Document, ManualClock, MemoryStore, Pipeline, SqliteStore, WorkflowOutcome, WorkflowStore,
};

use super::builders::{ConfigBuilder, FixedStrategy, MINIMAL_PDF};

/// Which persistence backend a harness runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Sqlite,
}

/// Remembers every review request in plain text.
#[derive(Default)]
pub struct CapturingNotifier {
    requests: Mutex<Vec<(String, ReviewSummary)>>,
}

impl CapturingNotifier {
    pub fn tokens(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(token, _)| token.clone())
            .collect()
    }

    pub fn summaries(&self) -> Vec<ReviewSummary> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, summary)| summary.clone())
            .collect()
    }

    pub fn last_token(&self) -> Option<String> {
        self.requests
            .lock()
            .unwrap()
            .last()
            .map(|(token, _)| token.clone())
    }
}

#[async_trait]
impl ReviewNotifier for CapturingNotifier {
    async fn notify(&self, request: ReviewRequest) -> Result<(), NotifyError> {
        self.requests
            .lock()
            .unwrap()
            .push((expose(&request.token).to_string(), request.summary));
        Ok(())
    }
}

/// A pipeline plus the handles tests need to drive and inspect it.
pub struct TestHarness {
    pub pipeline: Pipeline,
    pub store: Arc<dyn WorkflowStore>,
    pub notifier: Arc<CapturingNotifier>,
    pub clock: Arc<ManualClock>,
    pub config: Config,
    /// Keeps the SQLite file alive for the harness lifetime.
    _temp_dir: Option<TempDir>,
}

impl TestHarness {
    /// Harness whose extraction always yields `fields` at `confidence`.
    pub fn new(kind: StoreKind, fields: Vec<(String, String)>, confidence: f64) -> Self {
        let strategy: Arc<dyn ExtractionStrategy> =
            Arc::new(FixedStrategy::new("stub", fields, confidence));
        Self::with_strategy(kind, ConfigBuilder::new().build(), strategy)
    }

    pub fn with_strategy(
        kind: StoreKind,
        config: Config,
        strategy: Arc<dyn ExtractionStrategy>,
    ) -> Self {
        let (store, temp_dir) = open_store(kind);
        let notifier = Arc::new(CapturingNotifier::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        ));

        let engine = ExtractionEngine::new(
            strategy,
            None,
            EngineSettings {
                quality_threshold: 0.0,
                ..EngineSettings::from_config(&config.extraction)
            },
        );

        let pipeline = Pipeline::new(&config, store.clone(), notifier.clone())
            .expect("Failed to build pipeline")
            .with_engine(engine)
            .with_clock(clock.clone());

        Self {
            pipeline,
            store,
            notifier,
            clock,
            config,
            _temp_dir: temp_dir,
        }
    }

    /// Harness using the configured extraction stack (text layer, no OCR).
    pub fn with_config(kind: StoreKind, config: Config) -> Self {
        let (store, temp_dir) = open_store(kind);
        let notifier = Arc::new(CapturingNotifier::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        ));

        let pipeline = Pipeline::new(&config, store.clone(), notifier.clone())
            .expect("Failed to build pipeline")
            .with_clock(clock.clone());

        Self {
            pipeline,
            store,
            notifier,
            clock,
            config,
            _temp_dir: temp_dir,
        }
    }

    pub fn document(&self) -> Document {
        Document::new(
            MINIMAL_PDF.to_vec(),
            Some("application/pdf".to_string()),
            self.config.extraction.max_document_bytes,
        )
        .expect("Failed to build document")
        .with_filename("acme-0042.pdf")
    }

    pub async fn process(&self, workflow_id: &str) -> WorkflowOutcome {
        self.pipeline.process(&self.document(), workflow_id).await
    }

    /// Processes a document and returns the token the reviewer received.
    pub async fn suspend(&self, workflow_id: &str) -> String {
        let outcome = self.process(workflow_id).await;
        assert!(
            matches!(outcome, WorkflowOutcome::AwaitingReview { .. }),
            "Expected suspension, got {:?}",
            outcome
        );
        self.notifier
            .last_token()
            .expect("Notifier did not receive a token")
    }

    pub fn advance_hours(&self, hours: i64) {
        self.clock.advance(Duration::hours(hours));
    }
}

fn open_store(kind: StoreKind) -> (Arc<dyn WorkflowStore>, Option<TempDir>) {
    match kind {
        StoreKind::Memory => (Arc::new(MemoryStore::new()), None),
        StoreKind::Sqlite => {
            let temp_dir = TempDir::new().expect("Failed to create temp directory");
            let store = SqliteStore::open(&temp_dir.path().join("billflow.db"))
                .expect("Failed to open SQLite store");
            (Arc::new(store), Some(temp_dir))
        }
    }
}
