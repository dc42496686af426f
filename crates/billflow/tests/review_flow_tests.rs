//! Suspend and resume through the public pipeline API, against both the
//! in-memory and the SQLite store.

mod common;

use std::collections::BTreeMap;

use chrono::Duration;
use secrecy::ExposeSecret;

use billflow::{ResumeError, ReviewerAction, WorkflowOutcome, WorkflowStep};
use common::{complete_invoice, StoreKind, TestHarness};

fn review_harness(kind: StoreKind) -> TestHarness {
    // Above the default 1000 auto-approve limit.
    TestHarness::new(kind, complete_invoice("5000.00"), 0.95)
}

fn corrections(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn check_approve_finishes_workflow(kind: StoreKind) {
    let harness = review_harness(kind);
    let token = harness.suspend("wf-approve").await;

    let outcome = harness
        .pipeline
        .resume(&token, ReviewerAction::Approve)
        .await
        .unwrap();
    assert_eq!(outcome, WorkflowOutcome::Approved { reviewed: true });

    let history = harness.store.list_checkpoints("wf-approve").await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].consumed);
    assert!(history[0].consumed_at.is_some());
    assert!(harness
        .store
        .live_checkpoint("wf-approve")
        .await
        .unwrap()
        .is_none());
}

async fn check_token_is_single_use(kind: StoreKind) {
    let harness = review_harness(kind);
    let token = harness.suspend("wf-reuse").await;

    harness
        .pipeline
        .resume(&token, ReviewerAction::Approve)
        .await
        .unwrap();
    let second = harness
        .pipeline
        .resume(&token, ReviewerAction::Approve)
        .await;

    match second {
        Err(e @ ResumeError::TokenAlreadyConsumed) => {
            assert_eq!(e.code(), "token_already_used");
            assert_eq!(e.user_message(), "This invoice has already been processed.");
        }
        other => panic!("Expected TokenAlreadyConsumed, got {:?}", other),
    }
}

async fn check_reject_keeps_reason(kind: StoreKind) {
    let harness = review_harness(kind);
    let token = harness.suspend("wf-reject").await;

    let outcome = harness
        .pipeline
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

async fn check_modify_revalidates_and_approves(kind: StoreKind) {
    let harness = review_harness(kind);
    let token = harness.suspend("wf-modify").await;

    let outcome = harness
        .pipeline
        .resume(
            &token,
            ReviewerAction::Modify {
                feedback: Some("total was misread".to_string()),
                corrections: corrections(&[("total", "500.00")]),
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome, WorkflowOutcome::Approved { reviewed: true });
    assert_eq!(harness.notifier.tokens().len(), 1);
}

async fn check_modify_can_suspend_again(kind: StoreKind) {
    let harness = review_harness(kind);
    let first_token = harness.suspend("wf-again").await;

    let outcome = harness
        .pipeline
        .resume(
            &first_token,
            ReviewerAction::Modify {
                feedback: Some("vendor name fixed".to_string()),
                corrections: corrections(&[("vendor", "ACME Holding GmbH")]),
            },
        )
        .await
        .unwrap();
    assert!(matches!(outcome, WorkflowOutcome::AwaitingReview { .. }));

    let tokens = harness.notifier.tokens();
    assert_eq!(tokens.len(), 2);
    assert_ne!(tokens[0], tokens[1]);

    let history = harness.store.list_checkpoints("wf-again").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].consumed);
    assert!(!history[1].consumed);
    assert_eq!(history[1].step, WorkflowStep::HumanReview);

    let payload = &history[1].payload;
    assert_eq!(payload["review_rounds"], 1);
    assert_eq!(payload["feedback"][0], "vendor name fixed");
    assert_eq!(payload["corrections"]["vendor"], "ACME Holding GmbH");

    // The second link works, the first stays spent.
    let outcome = harness
        .pipeline
        .resume(&tokens[1], ReviewerAction::Approve)
        .await
        .unwrap();
    assert_eq!(outcome, WorkflowOutcome::Approved { reviewed: true });
    assert!(matches!(
        harness
            .pipeline
            .resume(&tokens[0], ReviewerAction::Approve)
            .await,
        Err(ResumeError::TokenAlreadyConsumed)
    ));
}

async fn check_expired_link_changes_nothing(kind: StoreKind) {
    let harness = review_harness(kind);
    let token = harness.suspend("wf-expired").await;
    harness.advance_hours(25);

    for _ in 0..2 {
        match harness
            .pipeline
            .resume(&token, ReviewerAction::Approve)
            .await
        {
            Err(e @ ResumeError::TokenExpired { .. }) => {
                assert_eq!(e.code(), "token_expired");
                assert_eq!(
                    e.user_message(),
                    "This link has expired. Please request a new one."
                );
            }
            other => panic!("Expected TokenExpired, got {:?}", other),
        }
    }

    let live = harness.store.live_checkpoint("wf-expired").await.unwrap();
    assert!(live.is_some(), "Expired redemption must not consume the checkpoint");
}

async fn check_unknown_token(kind: StoreKind) {
    let harness = review_harness(kind);
    harness.suspend("wf-unknown").await;

    let result = harness
        .pipeline
        .resume("not-a-real-token", ReviewerAction::Approve)
        .await;
    assert!(matches!(result, Err(ResumeError::TokenNotFound)));
}

async fn check_concurrent_resume_has_one_winner(kind: StoreKind) {
    let harness = review_harness(kind);
    let token = harness.suspend("wf-race").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = harness.pipeline.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            pipeline.resume(&token, ReviewerAction::Approve).await
        }));
    }

    let mut winners = 0;
    let mut already_used = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(WorkflowOutcome::Approved { reviewed: true }) => winners += 1,
            Err(ResumeError::TokenAlreadyConsumed) => already_used += 1,
            other => panic!("Unexpected resume result: {:?}", other),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(already_used, 7);
}

async fn check_undecodable_state_keeps_token(kind: StoreKind) {
    let harness = review_harness(kind);
    let (checkpoint, token) = harness
        .pipeline
        .controller()
        .suspend_for_review(
            "wf-garbled",
            WorkflowStep::HumanReview,
            serde_json::json!({ "bogus": 1 }),
            Duration::hours(24),
        )
        .await
        .unwrap();
    let value = token.value.expose_secret();

    for _ in 0..2 {
        match harness.pipeline.resume(value, ReviewerAction::Approve).await {
            Err(e @ ResumeError::InvalidCheckpoint(_)) => {
                assert_eq!(e.code(), "checkpoint_invalid");
                assert!(!e.user_message().contains("wf-garbled"));
            }
            other => panic!("Expected InvalidCheckpoint, got {:?}", other),
        }
    }

    let live = harness.store.live_checkpoint("wf-garbled").await.unwrap();
    assert_eq!(live.map(|c| c.id), Some(checkpoint.id));
    let redeemed = harness
        .pipeline
        .controller()
        .tokens()
        .redeem(value)
        .await
        .unwrap();
    assert_eq!(redeemed.workflow_id, "wf-garbled");
}

#[tokio::test]
async fn test_undecodable_state_keeps_token_memory() {
    check_undecodable_state_keeps_token(StoreKind::Memory).await;
}

#[tokio::test]
async fn test_undecodable_state_keeps_token_sqlite() {
    check_undecodable_state_keeps_token(StoreKind::Sqlite).await;
}

#[tokio::test]
async fn test_approve_finishes_workflow_memory() {
    check_approve_finishes_workflow(StoreKind::Memory).await;
}

#[tokio::test]
async fn test_approve_finishes_workflow_sqlite() {
    check_approve_finishes_workflow(StoreKind::Sqlite).await;
}

#[tokio::test]
async fn test_token_is_single_use_memory() {
    check_token_is_single_use(StoreKind::Memory).await;
}

#[tokio::test]
async fn test_token_is_single_use_sqlite() {
    check_token_is_single_use(StoreKind::Sqlite).await;
}

#[tokio::test]
async fn test_reject_keeps_reason_memory() {
    check_reject_keeps_reason(StoreKind::Memory).await;
}

#[tokio::test]
async fn test_reject_keeps_reason_sqlite() {
    check_reject_keeps_reason(StoreKind::Sqlite).await;
}

#[tokio::test]
async fn test_modify_revalidates_and_approves_memory() {
    check_modify_revalidates_and_approves(StoreKind::Memory).await;
}

#[tokio::test]
async fn test_modify_revalidates_and_approves_sqlite() {
    check_modify_revalidates_and_approves(StoreKind::Sqlite).await;
}

#[tokio::test]
async fn test_modify_can_suspend_again_memory() {
    check_modify_can_suspend_again(StoreKind::Memory).await;
}

#[tokio::test]
async fn test_modify_can_suspend_again_sqlite() {
    check_modify_can_suspend_again(StoreKind::Sqlite).await;
}

#[tokio::test]
async fn test_expired_link_changes_nothing_memory() {
    check_expired_link_changes_nothing(StoreKind::Memory).await;
}

#[tokio::test]
async fn test_expired_link_changes_nothing_sqlite() {
    check_expired_link_changes_nothing(StoreKind::Sqlite).await;
}

#[tokio::test]
async fn test_unknown_token_memory() {
    check_unknown_token(StoreKind::Memory).await;
}

#[tokio::test]
async fn test_unknown_token_sqlite() {
    check_unknown_token(StoreKind::Sqlite).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resume_has_one_winner_memory() {
    check_concurrent_resume_has_one_winner(StoreKind::Memory).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resume_has_one_winner_sqlite() {
    check_concurrent_resume_has_one_winner(StoreKind::Sqlite).await;
}

#[tokio::test]
async fn test_review_summary_carries_display_fields_only() {
    let harness = review_harness(StoreKind::Memory);
    harness.suspend("wf-summary").await;

    let summaries = harness.notifier.summaries();
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.filename, "acme-0042.pdf");
    assert_eq!(summary.invoice_number.as_deref(), Some("INV-0042"));
    assert_eq!(summary.total.as_deref(), Some("5000.00"));
    assert!(summary
        .reasons
        .iter()
        .any(|r| r.contains("auto-approve limit")));

    let json = serde_json::to_string(summary).unwrap();
    assert!(!json.contains("wf-summary"));
}

#[tokio::test]
async fn test_second_suspension_of_live_workflow_fails() {
    let harness = review_harness(StoreKind::Sqlite);
    harness.suspend("wf-twice").await;

    match harness.process("wf-twice").await {
        WorkflowOutcome::Failed { error } => assert!(error.contains("already")),
        other => panic!("Expected Failed, got {:?}", other),
    }
    assert_eq!(harness.notifier.tokens().len(), 1);
}
