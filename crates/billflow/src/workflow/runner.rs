use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::Instrument;

use crate::checkpoint::{
    plan_resume, ResumeController, ResumeError, ResumeOutcome, ReviewerAction, WorkflowStep,
};
use crate::config::{validate_config, Config};
use crate::document::Document;
use crate::error::ConfigError;
use crate::extraction::ExtractionEngine;
use crate::routing::{ApprovalRouter, Decision, ReasonCode, RoutingThresholds};
use crate::sanitize;
use crate::store::{CheckpointCheck, WorkflowCheckpoint, WorkflowStore};
use crate::token::{Clock, SystemClock, TokenService};
use crate::validation::{parse_amount, Validator};

use super::notify::{ReviewNotifier, ReviewRequest, ReviewSummary};
use super::progress::{NoopProgress, ProgressReporter, WorkflowEvent};
use super::state::{WorkflowState, WorkflowStatus};

/// Shown when a document had to be rejected because nothing usable could
/// be read from it.
const RESUBMIT_MESSAGE: &str =
    "This invoice failed automatic extraction. Please attach a clearer copy.";

/// How a call to `process` or `resume` ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    Approved {
        reviewed: bool,
    },
    Rejected {
        reason: String,
    },
    AwaitingReview {
        checkpoint_id: String,
        expires_at: DateTime<Utc>,
    },
    Failed {
        error: String,
    },
}

impl WorkflowOutcome {
    /// Text for the person who submitted the document.
    pub fn user_message(&self) -> String {
        match self {
            WorkflowOutcome::Approved { .. } => "This invoice has been approved.".to_string(),
            WorkflowOutcome::Rejected { reason } if reason == ReasonCode::ConfidenceBelowFloor.as_str() => {
                RESUBMIT_MESSAGE.to_string()
            }
            WorkflowOutcome::Rejected { reason } => format!("This invoice was rejected: {}", reason),
            WorkflowOutcome::AwaitingReview { .. } => {
                "This invoice is waiting for review.".to_string()
            }
            WorkflowOutcome::Failed { error } => error.clone(),
        }
    }
}

/// Runs documents through extract, merge, validate and route, suspending
/// at human review and picking up again on `resume`.
#[derive(Clone)]
pub struct Pipeline {
    engine: ExtractionEngine,
    validator: Arc<Validator>,
    router: ApprovalRouter,
    amount_field: String,
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    controller: ResumeController,
    notifier: Arc<dyn ReviewNotifier>,
    progress: Arc<dyn ProgressReporter>,
}

impl Pipeline {
    /// Builds every component from `config`. Fails on any configuration
    /// problem, so a bad rule set stops startup rather than individual
    /// documents.
    pub fn new(
        config: &Config,
        store: Arc<dyn WorkflowStore>,
        notifier: Arc<dyn ReviewNotifier>,
    ) -> Result<Self, ConfigError> {
        validate_config(config)?;

        let engine = ExtractionEngine::from_config(&config.extraction)?;
        let validator = Arc::new(Validator::from_config(&config.validation)?);
        tracing::debug!(rules = validator.rule_count(), "Validation rules loaded");
        let router = ApprovalRouter::new(
            RoutingThresholds::from_config(&config.routing),
            config.review.token_ttl_secs,
        );
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let controller = ResumeController::new(
            store.clone(),
            TokenService::new(store.clone(), clock.clone()),
        );

        Ok(Self {
            engine,
            validator,
            router,
            amount_field: config.routing.amount_field.clone(),
            store,
            clock,
            controller,
            notifier,
            progress: Arc::new(NoopProgress),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.controller = ResumeController::new(
            self.store.clone(),
            TokenService::new(self.store.clone(), clock.clone()),
        );
        self.clock = clock;
        self
    }

    pub fn with_engine(mut self, engine: ExtractionEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn controller(&self) -> &ResumeController {
        &self.controller
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    /// Processes one document under a caller-chosen workflow id.
    pub async fn process(&self, document: &Document, workflow_id: &str) -> WorkflowOutcome {
        let filename = document
            .filename()
            .map(|f| sanitize::redact_path(std::path::Path::new(f)))
            .unwrap_or_default();
        let span = tracing::info_span!(
            "workflow",
            workflow_id,
            document_id = %document.id(),
            filename = %filename,
        );

        async {
            self.report_step(workflow_id, WorkflowStep::Extract, "Extracting fields...");
            let extraction = match self.engine.extract(document).await {
                Ok(extraction) => extraction,
                Err(e) => {
                    tracing::warn!(error = %e, code = e.code(), "Document rejected at intake");
                    return self.fail(workflow_id, e.user_message());
                }
            };

            let mut state = WorkflowState::new(workflow_id, document.summary(), extraction);
            state.step = WorkflowStep::MergeExtraction;
            self.run_from(state, &BTreeMap::new()).await
        }
        .instrument(span)
        .await
    }

    /// Continues a suspended workflow with the reviewer's decision.
    ///
    /// Token problems are returned as errors so the reviewer-facing layer
    /// can tell "expired" from "already used". Once the checkpoint is
    /// consumed, everything else ends up in the returned outcome. A stored
    /// state that no longer decodes is refused before the token is spent.
    pub async fn resume(
        &self,
        token: &str,
        action: ReviewerAction,
    ) -> Result<WorkflowOutcome, ResumeError> {
        let decodes: CheckpointCheck = Arc::new(|cp: &WorkflowCheckpoint| -> Result<(), String> {
            WorkflowState::check_payload(&cp.payload)
        });
        let resumed = self.controller.resume_checked(token, decodes).await?;
        let mut state = WorkflowState::from_payload(&resumed.checkpoint.payload)?;
        let plan = plan_resume(&action, resumed.checkpoint.step);

        let span = tracing::info_span!(
            "workflow",
            workflow_id = %state.workflow_id,
            action = action.as_str(),
        );

        let outcome = async {
            self.progress.report(WorkflowEvent::Resumed {
                workflow_id: state.workflow_id.clone(),
                action: action.as_str().to_string(),
            });

            let updates = plan.state_updates;
            if let Some(feedback) = updates.feedback.clone() {
                state.feedback.push(feedback);
            }

            match plan.outcome {
                ResumeOutcome::ResumedApproved => {
                    state.step = plan.next_step;
                    self.finish(state, WorkflowStatus::Approved);
                    WorkflowOutcome::Approved { reviewed: true }
                }
                ResumeOutcome::ResumedRejected => {
                    let reason = updates
                        .rejection_reason
                        .unwrap_or_else(|| "rejected by reviewer".to_string());
                    self.finish(state, WorkflowStatus::Rejected);
                    WorkflowOutcome::Rejected { reason }
                }
                ResumeOutcome::ResumedModified => {
                    state.review_rounds += 1;
                    state.step = plan.next_step;
                    self.run_from(state, &updates.corrections).await
                }
            }
        }
        .instrument(span)
        .await;

        Ok(outcome)
    }

    /// Runs merge, validate and route on `state`, then suspends or
    /// finishes.
    async fn run_from(
        &self,
        mut state: WorkflowState,
        corrections: &BTreeMap<String, String>,
    ) -> WorkflowOutcome {
        let workflow_id = state.workflow_id.clone();

        {
            let _step = tracing::info_span!("merge_extraction").entered();
            self.report_step(&workflow_id, WorkflowStep::MergeExtraction, "Merging corrections...");
            if !corrections.is_empty() {
                state.extraction.apply_corrections(corrections);
                state
                    .corrections
                    .extend(corrections.iter().map(|(k, v)| (k.clone(), v.clone())));
                tracing::info!(fields = corrections.len(), "Applied reviewer corrections");
            }
        }

        self.report_step(&workflow_id, WorkflowStep::Validate, "Validating fields...");
        state.step = WorkflowStep::Validate;
        let today = self.clock.now().date_naive();
        let validation = self.validator.validate_at(&state.extraction, today);

        self.report_step(&workflow_id, WorkflowStep::Route, "Routing...");
        state.step = WorkflowStep::Route;
        let amount = state
            .extraction
            .field(&self.amount_field)
            .and_then(parse_amount);
        let decision = self
            .router
            .route(validation.adjusted_confidence, amount, validation.valid);
        state.validation = Some(validation);
        state.decision = Some(decision.clone());

        match decision.decision {
            Decision::AutoApprove => {
                let reviewed = state.review_rounds > 0;
                state.step = WorkflowStep::Finalize;
                self.finish(state, WorkflowStatus::Approved);
                WorkflowOutcome::Approved { reviewed }
            }
            Decision::AutoReject => {
                state.step = WorkflowStep::Finalize;
                self.finish(state, WorkflowStatus::Rejected);
                WorkflowOutcome::Rejected {
                    reason: decision.reason.as_str().to_string(),
                }
            }
            Decision::HumanReview => {
                let ttl_secs = decision
                    .review_policy
                    .map(|p| p.ttl_secs)
                    .unwrap_or(crate::config::ReviewConfig::default().token_ttl_secs);
                self.suspend(state, ttl_secs).await
            }
        }
    }

    async fn suspend(&self, mut state: WorkflowState, ttl_secs: u64) -> WorkflowOutcome {
        let workflow_id = state.workflow_id.clone();
        self.report_step(&workflow_id, WorkflowStep::HumanReview, "Waiting for review...");

        state.step = WorkflowStep::HumanReview;
        state.status = WorkflowStatus::AwaitingReview;

        let Some(ttl) = i64::try_from(ttl_secs).ok().and_then(Duration::try_seconds) else {
            return self.fail(&workflow_id, format!("review TTL of {}s is out of range", ttl_secs));
        };
        let payload = match state.to_payload() {
            Ok(payload) => payload,
            Err(e) => return self.fail(&workflow_id, format!("could not save review state: {}", e)),
        };

        let (checkpoint, token) = match self
            .controller
            .suspend_for_review(&workflow_id, WorkflowStep::HumanReview, payload, ttl)
            .await
        {
            Ok(suspended) => suspended,
            Err(e) => {
                tracing::error!(error = %e, "Suspension failed");
                return self.fail(&workflow_id, format!("could not suspend for review: {}", e));
            }
        };

        let summary = review_summary(&state, token.expires_at);
        if let Err(e) = self
            .notifier
            .notify(ReviewRequest {
                token: token.value,
                summary,
            })
            .await
        {
            tracing::error!(checkpoint_id = %checkpoint.id, error = %e, "Review notification failed");
        }

        self.progress.report(WorkflowEvent::Suspended {
            workflow_id,
            checkpoint_id: checkpoint.id.clone(),
            expires_at: token.expires_at,
        });

        WorkflowOutcome::AwaitingReview {
            checkpoint_id: checkpoint.id,
            expires_at: token.expires_at,
        }
    }

    fn finish(&self, mut state: WorkflowState, status: WorkflowStatus) {
        state.status = status;
        tracing::info!(
            status = ?status,
            confidence = state.confidence(),
            review_rounds = state.review_rounds,
            "Workflow finished"
        );
        self.progress.report(WorkflowEvent::Finished {
            workflow_id: state.workflow_id,
            status,
        });
    }

    fn fail(&self, workflow_id: &str, error: String) -> WorkflowOutcome {
        self.progress.report(WorkflowEvent::Failed {
            workflow_id: workflow_id.to_string(),
            error: error.clone(),
        });
        WorkflowOutcome::Failed { error }
    }

    fn report_step(&self, workflow_id: &str, step: WorkflowStep, message: &str) {
        self.progress.report(WorkflowEvent::Step {
            workflow_id: workflow_id.to_string(),
            step,
            message: message.to_string(),
        });
    }
}

fn review_summary(state: &WorkflowState, expires_at: DateTime<Utc>) -> ReviewSummary {
    let field = |name: &str| state.extraction.field(name).map(str::to_string);

    let mut reasons: Vec<String> = state
        .validation
        .iter()
        .flat_map(|v| v.violations.iter().map(|violation| violation.message.clone()))
        .collect();
    if let Some(decision) = &state.decision {
        let reason = match decision.reason {
            ReasonCode::AmountAboveLimit => Some("Amount is above the auto-approve limit"),
            ReasonCode::ConfidenceInReviewBand => Some("Extraction confidence is too low to approve automatically"),
            _ => None,
        };
        reasons.extend(reason.map(str::to_string));
    }

    ReviewSummary {
        filename: state.document.filename.clone(),
        vendor: field("vendor"),
        invoice_number: field("invoice_number"),
        invoice_date: field("date"),
        total: field("total"),
        currency: field("currency"),
        confidence: state.confidence(),
        reasons,
        expires_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DocumentFormat;
    use crate::error::ExtractionError;
    use crate::extraction::{EngineSettings, ExtractionStrategy, RawExtraction};
    use crate::store::MemoryStore;
    use crate::token::ManualClock;
    use crate::workflow::notify::BroadcastNotifier;
    use secrecy::ExposeSecret;
    use std::sync::Mutex;

    const PDF: &[u8] = b"%PDF-1.4\n%%EOF";

    /// Reports the same fields for every document.
    struct StubStrategy {
        fields: Vec<(String, String)>,
        confidence: f64,
    }

    impl ExtractionStrategy for StubStrategy {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn extract_raw(
            &self,
            _bytes: &[u8],
            _format: DocumentFormat,
        ) -> Result<RawExtraction, ExtractionError> {
            let mut raw = RawExtraction {
                text: "invoice total vendor".to_string(),
                ..RawExtraction::default()
            };
            for (name, value) in &self.fields {
                raw.fields.insert(name.clone(), value.clone());
                raw.field_confidence.insert(name.clone(), self.confidence);
            }
            Ok(raw)
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<WorkflowEvent>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn report(&self, event: WorkflowEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn pipeline_with(
        extracted: Vec<(String, String)>,
        confidence: f64,
    ) -> (Pipeline, Arc<BroadcastNotifier>, Arc<ManualClock>) {
        let config = Config::default();
        let store: Arc<dyn WorkflowStore> = Arc::new(MemoryStore::new());
        let notifier = Arc::new(BroadcastNotifier::new(8));
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let fast: Arc<dyn ExtractionStrategy> = Arc::new(StubStrategy {
            fields: extracted,
            confidence,
        });
        let engine = ExtractionEngine::new(
            fast,
            None,
            EngineSettings {
                quality_threshold: 0.0,
                ..EngineSettings::default()
            },
        );

        let pipeline = Pipeline::new(&config, store, notifier.clone())
            .unwrap()
            .with_engine(engine)
            .with_clock(clock.clone());
        (pipeline, notifier, clock)
    }

    fn document() -> Document {
        Document::new(PDF.to_vec(), None, crate::document::default_max_bytes())
            .unwrap()
            .with_filename("acme.pdf")
    }

    fn complete_invoice(total: &str) -> Vec<(String, String)> {
        fields(&[
            ("invoice_number", "INV-0042"),
            ("vendor", "ACME GmbH"),
            ("date", "2024-03-01"),
            ("total", total),
            ("currency", "EUR"),
        ])
    }

    #[tokio::test]
    async fn test_small_confident_invoice_is_auto_approved() {
        let (pipeline, _, _) = pipeline_with(complete_invoice("50.00"), 0.95);
        let progress = Arc::new(RecordingProgress::default());
        let pipeline = pipeline.with_progress(progress.clone());

        let outcome = pipeline.process(&document(), "wf-1").await;
        assert_eq!(outcome, WorkflowOutcome::Approved { reviewed: false });

        let events = progress.events.lock().unwrap();
        assert!(matches!(
            events.last(),
            Some(WorkflowEvent::Finished {
                status: WorkflowStatus::Approved,
                ..
            })
        ));
        assert!(pipeline.store().live_checkpoint("wf-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_invoice_is_rejected_for_resubmission() {
        // Only a shaky total: valid, but far below the review floor.
        let (pipeline, _, _) = pipeline_with(fields(&[("total", "50.00")]), 0.3);
        let outcome = pipeline.process(&document(), "wf-1").await;
        match &outcome {
            WorkflowOutcome::Rejected { reason } => assert_eq!(reason, "confidence_below_floor"),
            other => panic!("Expected Rejected, got {:?}", other),
        }
        assert!(outcome.user_message().contains("clearer copy"));
    }

    #[tokio::test]
    async fn test_large_invoice_suspends_and_notifies() {
        let (pipeline, notifier, _) = pipeline_with(complete_invoice("5000.00"), 0.95);
        let mut requests = notifier.subscribe();

        let outcome = pipeline.process(&document(), "wf-1").await;
        let WorkflowOutcome::AwaitingReview { checkpoint_id, .. } = outcome else {
            panic!("Expected AwaitingReview, got {:?}", outcome);
        };

        let request = requests.recv().await.unwrap();
        assert_eq!(request.summary.total.as_deref(), Some("5000.00"));
        assert_eq!(request.summary.filename, "acme.pdf");
        assert!(request
            .summary
            .reasons
            .iter()
            .any(|r| r.contains("auto-approve limit")));
        let summary_json = serde_json::to_string(&request.summary).unwrap();
        assert!(!summary_json.contains(&checkpoint_id));

        let live = pipeline.store().live_checkpoint("wf-1").await.unwrap().unwrap();
        assert_eq!(live.id, checkpoint_id);
        assert_eq!(live.step, WorkflowStep::HumanReview);
    }

    #[tokio::test]
    async fn test_resume_approve_finishes_once() {
        let (pipeline, notifier, _) = pipeline_with(complete_invoice("5000.00"), 0.95);
        let mut requests = notifier.subscribe();
        pipeline.process(&document(), "wf-1").await;
        let token = requests.recv().await.unwrap().token.expose_secret().to_string();

        let outcome = pipeline.resume(&token, ReviewerAction::Approve).await.unwrap();
        assert_eq!(outcome, WorkflowOutcome::Approved { reviewed: true });

        let err = pipeline
            .resume(&token, ReviewerAction::Approve)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "token_already_used");
    }

    #[tokio::test]
    async fn test_resume_reject_carries_reason() {
        let (pipeline, notifier, _) = pipeline_with(complete_invoice("5000.00"), 0.95);
        let mut requests = notifier.subscribe();
        pipeline.process(&document(), "wf-1").await;
        let token = requests.recv().await.unwrap().token.expose_secret().to_string();

        let outcome = pipeline
            .resume(
                &token,
                ReviewerAction::Reject {
                    reason: "duplicate of INV-0041".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WorkflowOutcome::Rejected {
                reason: "duplicate of INV-0041".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_modify_revalidates_and_can_approve() {
        // Missing total: blocking violation forces review.
        let mut extracted = complete_invoice("0");
        extracted.retain(|(k, _)| k != "total");
        let (pipeline, notifier, _) = pipeline_with(extracted, 0.95);
        let mut requests = notifier.subscribe();

        let outcome = pipeline.process(&document(), "wf-1").await;
        assert!(matches!(outcome, WorkflowOutcome::AwaitingReview { .. }));
        let request = requests.recv().await.unwrap();
        assert!(request.summary.reasons.iter().any(|r| r.contains("total")));
        let token = request.token.expose_secret().to_string();

        let outcome = pipeline
            .resume(
                &token,
                ReviewerAction::Modify {
                    feedback: Some("total was missing".to_string()),
                    corrections: BTreeMap::from([("total".to_string(), "80.00".to_string())]),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, WorkflowOutcome::Approved { reviewed: true });

        let history = pipeline.controller().history("wf-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].consumed);
    }

    #[tokio::test]
    async fn test_modify_can_suspend_again_with_feedback() {
        let (pipeline, notifier, _) = pipeline_with(complete_invoice("5000.00"), 0.95);
        let mut requests = notifier.subscribe();
        pipeline.process(&document(), "wf-1").await;
        let first = requests.recv().await.unwrap().token.expose_secret().to_string();

        let outcome = pipeline
            .resume(
                &first,
                ReviewerAction::Modify {
                    feedback: Some("vendor is ACME AG".to_string()),
                    corrections: BTreeMap::from([("vendor".to_string(), "ACME AG".to_string())]),
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, WorkflowOutcome::AwaitingReview { .. }));

        let second = requests.recv().await.unwrap();
        assert_eq!(second.summary.vendor.as_deref(), Some("ACME AG"));
        assert_ne!(second.token.expose_secret(), first.as_str());

        let history = pipeline.controller().history("wf-1").await.unwrap();
        assert_eq!(history.len(), 2);
        let state = WorkflowState::from_payload(&history[1].payload).unwrap();
        assert_eq!(state.feedback, vec!["vendor is ACME AG".to_string()]);
        assert_eq!(state.review_rounds, 1);
        assert_eq!(state.corrections["vendor"], "ACME AG");
    }

    #[tokio::test]
    async fn test_expired_review_link() {
        let (pipeline, notifier, clock) = pipeline_with(complete_invoice("5000.00"), 0.95);
        let mut requests = notifier.subscribe();
        pipeline.process(&document(), "wf-1").await;
        let token = requests.recv().await.unwrap().token.expose_secret().to_string();

        clock.advance(Duration::hours(25));
        let err = pipeline
            .resume(&token, ReviewerAction::Approve)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "token_expired");
        assert!(err.user_message().contains("expired"));
    }

    #[tokio::test]
    async fn test_second_process_while_suspended_fails() {
        let (pipeline, notifier, _) = pipeline_with(complete_invoice("5000.00"), 0.95);
        let _requests = notifier.subscribe();
        pipeline.process(&document(), "wf-1").await;

        match pipeline.process(&document(), "wf-1").await {
            WorkflowOutcome::Failed { error } => assert!(error.contains("already suspended")),
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_input_fails_with_actionable_message() {
        let (pipeline, _, _) = pipeline_with(complete_invoice("50.00"), 0.95);
        let pipeline = pipeline.with_engine(ExtractionEngine::new(
            Arc::new(StubStrategy {
                fields: Vec::new(),
                confidence: 0.9,
            }),
            None,
            EngineSettings {
                max_document_bytes: 4,
                ..EngineSettings::default()
            },
        ));

        match pipeline.process(&document(), "wf-1").await {
            WorkflowOutcome::Failed { error } => assert!(error.contains("too large")),
            other => panic!("Expected Failed, got {:?}", other),
        }
    }
}
