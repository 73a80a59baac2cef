//! Trait seams between the pipeline and its persistence.
//!
//! The orchestrator and review services are written against these traits so
//! that tests can substitute in-memory implementations.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use piast_core::models::{
    Actor, AuditEvent, Document, DocumentStats, ProcessingLogEntry, StatusHistoryEntry,
};

use crate::db::documents::NewDocument;

/// Document lifecycle operations.
///
/// Methods returning `Result<Option<Document>>` are conditional transitions:
/// `Ok(None)` means the precondition no longer held (another worker won the
/// claim, or the document left the expected status) and the caller must treat
/// the operation as a no-op.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(&self, new: NewDocument) -> Result<Document>;

    async fn get_document(&self, document_id: Uuid) -> Result<Option<Document>>;

    /// Pending documents whose retry time has elapsed, oldest first.
    async fn due_for_processing(&self, limit: i64) -> Result<Vec<Document>>;

    /// Atomically move a pending, due document to `processing`.
    async fn claim_for_processing(&self, document_id: Uuid) -> Result<Option<Document>>;

    async fn mark_completed(
        &self,
        document_id: Uuid,
        confidence: f64,
        transcription: &str,
        extracted: serde_json::Value,
    ) -> Result<Option<Document>>;

    async fn mark_needs_review(
        &self,
        document_id: Uuid,
        confidence: Option<f64>,
        transcription: Option<&str>,
        extracted: Option<serde_json::Value>,
        reason: &str,
    ) -> Result<Option<Document>>;

    /// Transient failure with retry budget remaining: back to `pending` with
    /// an incremented retry count and a future retry time.
    async fn schedule_retry(
        &self,
        document_id: Uuid,
        error_message: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Option<Document>>;

    /// Terminal failure. `count_attempt` increments the retry counter so an
    /// exhausted-retries failure records how many attempts were made.
    async fn mark_failed(
        &self,
        document_id: Uuid,
        error_message: &str,
        count_attempt: bool,
    ) -> Result<Option<Document>>;

    async fn mark_missing_remote_file(
        &self,
        document_id: Uuid,
        error_message: &str,
    ) -> Result<Option<Document>>;

    /// Rate-limit rejection: the document was never claimed, so only push its
    /// retry time forward. No status change, no history row.
    async fn defer_retry(
        &self,
        document_id: Uuid,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Option<Document>>;

    /// Reviewer approval: `completed` or `needs_review` becomes `verified`.
    /// `corrected_fields` replaces the stored extraction when present.
    async fn approve(
        &self,
        document_id: Uuid,
        reviewer: Uuid,
        corrected_fields: Option<serde_json::Value>,
    ) -> Result<Option<Document>>;

    /// Reviewer sends a completed extraction back for another look.
    async fn request_re_review(
        &self,
        document_id: Uuid,
        reviewer: Uuid,
        reason: &str,
    ) -> Result<Option<Document>>;

    /// Manual rescan: any reviewed or terminal document back to `pending`.
    async fn rescan(
        &self,
        document_id: Uuid,
        actor: Actor,
        reset_retries: bool,
    ) -> Result<Option<Document>>;

    /// Documents sitting in `processing` since before the cutoff.
    async fn stuck_in_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Document>>;

    async fn status_history(&self, document_id: Uuid) -> Result<Vec<StatusHistoryEntry>>;

    async fn case_stats(&self, case_id: Uuid) -> Result<DocumentStats>;
}

/// Append-only ledger of processing attempts, one row per attempt.
#[async_trait]
pub trait ProcessingLedger: Send + Sync {
    /// Record the start of an attempt. The row stays open until closed by
    /// `complete_attempt` or `fail_attempt`.
    async fn open_attempt(
        &self,
        document_id: Uuid,
        case_id: Uuid,
        input_bytes: Option<i64>,
    ) -> Result<ProcessingLogEntry>;

    async fn complete_attempt(
        &self,
        attempt_id: Uuid,
        confidence: f64,
        extracted: serde_json::Value,
    ) -> Result<()>;

    async fn fail_attempt(
        &self,
        attempt_id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> Result<()>;

    /// Record a rejection that never opened an attempt (rate limiting). The
    /// row is inserted already closed so it shows in the ledger but does not
    /// count against the trailing-window attempt limit.
    async fn record_rejection(
        &self,
        document_id: Uuid,
        case_id: Uuid,
        error_code: &str,
    ) -> Result<()>;

    /// Attempts started for the case since the given instant. Rejection rows
    /// are excluded.
    async fn attempts_started_since(&self, case_id: Uuid, since: DateTime<Utc>) -> Result<i64>;

    async fn attempts_for_document(&self, document_id: Uuid) -> Result<Vec<ProcessingLogEntry>>;

    /// Retention sweep over closed rows. Returns the number deleted.
    async fn delete_finished_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Append-only audit log for review decisions and operator alerts.
#[async_trait]
pub trait AuditTrail: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<()>;

    async fn events_for_document(&self, document_id: Uuid, limit: i64)
        -> Result<Vec<AuditEvent>>;
}
