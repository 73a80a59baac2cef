//! End-to-end pipeline scenarios against in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use piast_core::models::{AuditEventType, OcrStatus};
use piast_core::RetryPolicy;
use piast_db::ProcessingLedger;
use piast_ocr::OcrError;
use piast_pipeline::test_helpers::{
    civil_extraction, pending_document, FixedSelector, InMemoryStore, RecordingAlertSink,
    ScriptedInvoker, StaticFileStore,
};
use piast_pipeline::{
    AlertService, ConfidencePolicy, Orchestrator, ProcessOutcome, ProcessingPolicy, ReviewService,
    StuckScanner,
};

const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x01, 0x02, 0x03];

struct Harness {
    store: Arc<InMemoryStore>,
    invoker: Arc<ScriptedInvoker>,
    files: Arc<StaticFileStore>,
    sink: Arc<RecordingAlertSink>,
    orchestrator: Arc<Orchestrator>,
}

fn policy(case_rate_limit: u32) -> ProcessingPolicy {
    ProcessingPolicy {
        retry: RetryPolicy::default(),
        confidence: ConfidencePolicy {
            modern_threshold: 0.85,
            historical_threshold: 0.75,
        },
        max_image_bytes: 10 * 1024 * 1024,
        case_rate_limit,
        rate_limit_window: Duration::from_secs(3600),
        soft_timeout: Duration::from_secs(30),
    }
}

fn harness(case_rate_limit: u32) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let invoker = Arc::new(ScriptedInvoker::new());
    let files = Arc::new(StaticFileStore::new());
    let sink = Arc::new(RecordingAlertSink::new());
    let alerts = Arc::new(AlertService::new(store.clone(), Some(sink.clone())));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        store.clone(),
        files.clone(),
        Arc::new(FixedSelector::new(invoker.clone())),
        alerts,
        policy(case_rate_limit),
    ));
    Harness {
        store,
        invoker,
        files,
        sink,
        orchestrator,
    }
}

/// Force a retry-scheduled document to be due again so the next attempt can
/// claim it without waiting out the backoff.
fn make_due(h: &Harness, document_id: Uuid) {
    let mut document = h.store.document(document_id).unwrap();
    document.ocr_next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
    h.store.insert_document(document);
}

#[tokio::test]
async fn test_confident_extraction_completes() {
    let h = harness(10);
    let document = pending_document(Uuid::new_v4());
    h.files.put(&document.storage_path, JPEG_BYTES);
    h.store.insert_document(document.clone());
    h.invoker.push_ok(civil_extraction(0.92));

    let outcome = h.orchestrator.claim_and_process(document.id).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Completed(_)));

    let updated = h.store.document(document.id).unwrap();
    assert_eq!(updated.ocr_status, OcrStatus::Completed);
    assert_eq!(updated.ocr_confidence, Some(0.92));
    assert!(updated.ocr_text.is_some());
    assert!(updated.ocr_data.is_some());
    assert_eq!(updated.ocr_retry_count, 0);

    // One closed ledger row, one claim + one completion in history.
    let attempts = h.store.ledger_entries(document.id);
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].finished_at.is_some());
    assert_eq!(attempts[0].confidence, Some(0.92));

    let history = h.store.history(document.id);
    assert_eq!(history.len(), 2);
    assert!(piast_core::models::is_valid_walk(&history));
    assert_eq!(h.invoker.calls(), 1);
    assert!(h.sink.notifications().is_empty());
}

#[tokio::test]
async fn test_low_confidence_routes_to_review() {
    let h = harness(10);
    let document = pending_document(Uuid::new_v4());
    h.files.put(&document.storage_path, JPEG_BYTES);
    h.store.insert_document(document.clone());
    h.invoker.push_ok(civil_extraction(0.80));

    let outcome = h.orchestrator.claim_and_process(document.id).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::NeedsReview(_)));

    let updated = h.store.document(document.id).unwrap();
    assert_eq!(updated.ocr_status, OcrStatus::NeedsReview);
    assert_eq!(updated.ocr_confidence, Some(0.80));
    assert_eq!(updated.ocr_error_message.as_deref(), Some("low_confidence"));
    // The extraction is kept for the reviewer.
    assert!(updated.ocr_data.is_some());

    // A review-routed attempt still closes as completed in the ledger.
    let attempts = h.store.ledger_entries(document.id);
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].error_code.is_none());
}

#[tokio::test]
async fn test_confidence_at_threshold_is_accepted() {
    let h = harness(10);
    let document = pending_document(Uuid::new_v4());
    h.files.put(&document.storage_path, JPEG_BYTES);
    h.store.insert_document(document.clone());
    h.invoker.push_ok(civil_extraction(0.85));

    let outcome = h.orchestrator.claim_and_process(document.id).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Completed(_)));
}

#[tokio::test]
async fn test_transient_failures_back_off_then_fail_terminally() {
    let h = harness(10);
    let document = pending_document(Uuid::new_v4());
    h.files.put(&document.storage_path, JPEG_BYTES);
    h.store.insert_document(document.clone());
    for _ in 0..3 {
        h.invoker
            .push_err(OcrError::Transient("upstream 503".to_string()));
    }

    // First attempt: retry scheduled with the doubled base delay.
    let before = Utc::now();
    let outcome = h.orchestrator.claim_and_process(document.id).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::RetryScheduled(_)));
    let after_first = h.store.document(document.id).unwrap();
    assert_eq!(after_first.ocr_status, OcrStatus::Pending);
    assert_eq!(after_first.ocr_retry_count, 1);
    let next = after_first.ocr_next_retry_at.unwrap();
    let delay = (next - before).num_seconds();
    assert!((115..=125).contains(&delay), "delay was {}s", delay);

    // Second attempt: still within budget.
    make_due(&h, document.id);
    let outcome = h.orchestrator.claim_and_process(document.id).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::RetryScheduled(_)));
    assert_eq!(h.store.document(document.id).unwrap().ocr_retry_count, 2);

    // Third attempt exhausts the budget: terminal failure, alert raised.
    make_due(&h, document.id);
    let outcome = h.orchestrator.claim_and_process(document.id).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Failed(_)));

    let final_doc = h.store.document(document.id).unwrap();
    assert_eq!(final_doc.ocr_status, OcrStatus::Failed);
    assert_eq!(final_doc.ocr_retry_count, 3);
    assert_eq!(h.invoker.calls(), 3);

    let notifications = h.sink.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(
        notifications[0].event_type,
        AuditEventType::RetriesExhausted
    );
    assert_eq!(notifications[0].detail["attempts"], 3);

    // Three closed attempts in the ledger, all failed.
    let attempts = h.store.ledger_entries(document.id);
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| a.finished_at.is_some()));
}

#[tokio::test]
async fn test_missing_file_is_terminal_without_burning_retries() {
    let h = harness(10);
    let document = pending_document(Uuid::new_v4());
    // No file in the store.
    h.store.insert_document(document.clone());

    let outcome = h.orchestrator.claim_and_process(document.id).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::MissingRemoteFile(_)));

    let updated = h.store.document(document.id).unwrap();
    assert_eq!(updated.ocr_status, OcrStatus::MissingRemoteFile);
    assert_eq!(updated.ocr_retry_count, 0);
    assert_eq!(h.invoker.calls(), 0);

    let notifications = h.sink.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(
        notifications[0].event_type,
        AuditEventType::MissingRemoteFile
    );
}

#[tokio::test]
async fn test_concurrent_claims_invoke_ocr_exactly_once() {
    let h = harness(10);
    let document = pending_document(Uuid::new_v4());
    h.files.put(&document.storage_path, JPEG_BYTES);
    h.store.insert_document(document.clone());
    h.invoker.push_ok(civil_extraction(0.95));

    let (a, b) = tokio::join!(
        h.orchestrator.claim_and_process(document.id),
        h.orchestrator.claim_and_process(document.id),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let completed = [&a, &b]
        .iter()
        .filter(|o| matches!(o, ProcessOutcome::Completed(_)))
        .count();
    let lost = [&a, &b]
        .iter()
        .filter(|o| matches!(o, ProcessOutcome::ClaimLost))
        .count();
    assert_eq!((completed, lost), (1, 1), "outcomes were {:?} / {:?}", a, b);

    assert_eq!(h.invoker.calls(), 1);
    assert_eq!(h.store.ledger_entries(document.id).len(), 1);
    assert!(piast_core::models::is_valid_walk(&h.store.history(document.id)));
}

#[tokio::test]
async fn test_case_over_rate_limit_is_deferred_without_ocr_call() {
    let h = harness(2);
    let case_id = Uuid::new_v4();

    // Two attempts already started for the case inside the window.
    for _ in 0..2 {
        let earlier = pending_document(case_id);
        h.store.insert_document(earlier.clone());
        h.store
            .open_attempt(earlier.id, case_id, Some(earlier.file_size))
            .await
            .unwrap();
    }

    let document = pending_document(case_id);
    h.files.put(&document.storage_path, JPEG_BYTES);
    h.store.insert_document(document.clone());

    let outcome = h.orchestrator.claim_and_process(document.id).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::RateLimited));
    assert_eq!(h.invoker.calls(), 0);

    // Still pending, retry budget untouched, pushed into the future.
    let updated = h.store.document(document.id).unwrap();
    assert_eq!(updated.ocr_status, OcrStatus::Pending);
    assert_eq!(updated.ocr_retry_count, 0);
    assert!(updated.ocr_next_retry_at.unwrap() > Utc::now());

    // The rejection shows in the ledger but does not consume window budget.
    let rejections = h.store.ledger_entries(document.id);
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].error_code.as_deref(), Some("rate_limited"));
    let counted = h
        .store
        .attempts_started_since(case_id, Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(counted, 2);
}

#[tokio::test]
async fn test_unclassified_document_needs_review() {
    let h = harness(10);
    let document = pending_document(Uuid::new_v4());
    h.files.put(&document.storage_path, JPEG_BYTES);
    h.store.insert_document(document.clone());
    let mut extraction = civil_extraction(0.95);
    extraction.document_kind = piast_core::models::DocumentKind::Unknown;
    h.invoker.push_ok(extraction);

    let outcome = h.orchestrator.claim_and_process(document.id).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::NeedsReview(_)));
    let updated = h.store.document(document.id).unwrap();
    assert_eq!(
        updated.ocr_error_message.as_deref(),
        Some("unclassified_document")
    );
}

#[tokio::test]
async fn test_kind_mismatch_fails_without_retry() {
    let h = harness(10);
    let document = pending_document(Uuid::new_v4());
    h.files.put(&document.storage_path, JPEG_BYTES);
    h.store.insert_document(document.clone());
    let mut extraction = civil_extraction(0.95);
    extraction.document_kind = piast_core::models::DocumentKind::MarriageCertificate;
    h.invoker.push_ok(extraction);

    let outcome = h.orchestrator.claim_and_process(document.id).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Failed(_)));
    let updated = h.store.document(document.id).unwrap();
    assert_eq!(updated.ocr_status, OcrStatus::Failed);
    assert_eq!(updated.ocr_retry_count, 0);
}

#[tokio::test]
async fn test_reviewer_approval_verifies_document() {
    let h = harness(10);
    let document = pending_document(Uuid::new_v4());
    h.files.put(&document.storage_path, JPEG_BYTES);
    h.store.insert_document(document.clone());
    h.invoker.push_ok(civil_extraction(0.92));
    h.orchestrator.claim_and_process(document.id).await.unwrap();

    let review = ReviewService::new(h.store.clone(), h.store.clone());
    let reviewer = Uuid::new_v4();
    let verified = review.approve(document.id, reviewer).await.unwrap().unwrap();
    assert_eq!(verified.ocr_status, OcrStatus::Verified);
    assert_eq!(verified.ocr_reviewed_by, Some(reviewer));
    assert!(verified.is_verified_by_hac);

    // Approving again is a no-op: verified is terminal.
    assert!(review.approve(document.id, reviewer).await.unwrap().is_none());

    let events = h.store.audit_events();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.event_type == AuditEventType::ReviewApproved)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_approve_with_changes_replaces_extraction() {
    let h = harness(10);
    let document = pending_document(Uuid::new_v4());
    h.files.put(&document.storage_path, JPEG_BYTES);
    h.store.insert_document(document.clone());
    h.invoker.push_ok(civil_extraction(0.80));
    h.orchestrator.claim_and_process(document.id).await.unwrap();

    let review = ReviewService::new(h.store.clone(), h.store.clone());
    let corrected = serde_json::json!({"person_name": "Jan Nowak"});
    let verified = review
        .approve_with_changes(document.id, Uuid::new_v4(), corrected.clone())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(verified.ocr_status, OcrStatus::Verified);
    assert_eq!(verified.ocr_data, Some(corrected));
}

#[tokio::test]
async fn test_rescan_requeues_failed_document() {
    let h = harness(10);
    let document = pending_document(Uuid::new_v4());
    h.files.put(&document.storage_path, JPEG_BYTES);
    h.store.insert_document(document.clone());
    for _ in 0..3 {
        h.invoker
            .push_err(OcrError::Transient("upstream 503".to_string()));
    }
    for _ in 0..3 {
        h.orchestrator.claim_and_process(document.id).await.unwrap();
        make_due(&h, document.id);
    }
    assert_eq!(
        h.store.document(document.id).unwrap().ocr_status,
        OcrStatus::Failed
    );

    let review = ReviewService::new(h.store.clone(), h.store.clone());
    let requeued = review
        .rescan(document.id, Uuid::new_v4(), true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(requeued.ocr_status, OcrStatus::Pending);
    assert_eq!(requeued.ocr_retry_count, 0);
    assert!(requeued.ocr_next_retry_at.is_none());

    // A fresh attempt succeeds.
    h.invoker.push_ok(civil_extraction(0.91));
    let outcome = h.orchestrator.claim_and_process(document.id).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Completed(_)));
}

#[tokio::test]
async fn test_re_review_sends_completed_back() {
    let h = harness(10);
    let document = pending_document(Uuid::new_v4());
    h.files.put(&document.storage_path, JPEG_BYTES);
    h.store.insert_document(document.clone());
    h.invoker.push_ok(civil_extraction(0.92));
    h.orchestrator.claim_and_process(document.id).await.unwrap();

    let review = ReviewService::new(h.store.clone(), h.store.clone());
    let sent_back = review
        .request_re_review(document.id, Uuid::new_v4(), "dates look transposed")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sent_back.ocr_status, OcrStatus::NeedsReview);
    assert_eq!(
        sent_back.ocr_error_message.as_deref(),
        Some("dates look transposed")
    );
}

#[tokio::test]
async fn test_stuck_scanner_reports_once_per_episode() {
    let h = harness(10);
    let mut document = pending_document(Uuid::new_v4());
    document.ocr_status = OcrStatus::Processing;
    document.updated_at = Utc::now() - chrono::Duration::minutes(20);
    h.store.insert_document(document.clone());

    let alerts = Arc::new(AlertService::new(h.store.clone(), Some(h.sink.clone())));
    let scanner = StuckScanner::new(h.store.clone(), alerts, 600);

    assert_eq!(scanner.scan().await.unwrap(), 1);
    // Second pass over the same stuck document stays quiet.
    assert_eq!(scanner.scan().await.unwrap(), 0);

    let notifications = h.sink.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(
        notifications[0].event_type,
        AuditEventType::StuckInProcessing
    );
}
