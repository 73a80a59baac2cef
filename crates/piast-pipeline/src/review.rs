//! Human review gate.
//!
//! Reviewers act only on documents in `completed` or `needs_review` (rescans
//! also cover the terminal failure states). Every decision appends an
//! immutable audit entry; corrections are new decisions, never edits.

use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

use piast_core::models::{Actor, AuditEvent, AuditEventType, Document};
use piast_db::{AuditTrail, DocumentStore};

pub struct ReviewService {
    documents: Arc<dyn DocumentStore>,
    audit: Arc<dyn AuditTrail>,
}

impl ReviewService {
    pub fn new(documents: Arc<dyn DocumentStore>, audit: Arc<dyn AuditTrail>) -> Self {
        Self { documents, audit }
    }

    /// Approve the extraction as-is. `Ok(None)` when the document is not in a
    /// reviewable state.
    #[tracing::instrument(skip(self))]
    pub async fn approve(&self, document_id: Uuid, reviewer: Uuid) -> Result<Option<Document>> {
        let updated = self.documents.approve(document_id, reviewer, None).await?;
        if let Some(document) = &updated {
            self.audit
                .record(
                    &AuditEvent::system(
                        AuditEventType::ReviewApproved,
                        serde_json::json!({ "action": "approve" }),
                    )
                    .for_document(document.id, document.case_id)
                    .by(Actor::User(reviewer)),
                )
                .await?;
        }
        Ok(updated)
    }

    /// Approve with corrections: the reviewer's fields replace the stored
    /// extraction before verification.
    #[tracing::instrument(skip(self, corrected_fields))]
    pub async fn approve_with_changes(
        &self,
        document_id: Uuid,
        reviewer: Uuid,
        corrected_fields: serde_json::Value,
    ) -> Result<Option<Document>> {
        let updated = self
            .documents
            .approve(document_id, reviewer, Some(corrected_fields))
            .await?;
        if let Some(document) = &updated {
            self.audit
                .record(
                    &AuditEvent::system(
                        AuditEventType::ReviewApprovedWithChanges,
                        serde_json::json!({ "action": "approve_with_changes" }),
                    )
                    .for_document(document.id, document.case_id)
                    .by(Actor::User(reviewer)),
                )
                .await?;
        }
        Ok(updated)
    }

    /// Send a completed extraction back for another reviewer's look. The
    /// notes land on the document, not in the audit detail.
    #[tracing::instrument(skip(self, notes))]
    pub async fn request_re_review(
        &self,
        document_id: Uuid,
        reviewer: Uuid,
        notes: &str,
    ) -> Result<Option<Document>> {
        let updated = self
            .documents
            .request_re_review(document_id, reviewer, notes)
            .await?;
        if let Some(document) = &updated {
            self.audit
                .record(
                    &AuditEvent::system(
                        AuditEventType::ReReviewRequested,
                        serde_json::json!({ "action": "request_re_review" }),
                    )
                    .for_document(document.id, document.case_id)
                    .by(Actor::User(reviewer)),
                )
                .await?;
        }
        Ok(updated)
    }

    /// Manual rescan: queue the document for another OCR pass. Works from the
    /// reviewed states and the terminal failure states; the retry count
    /// survives unless `reset_retries` is set.
    #[tracing::instrument(skip(self))]
    pub async fn rescan(
        &self,
        document_id: Uuid,
        reviewer: Uuid,
        reset_retries: bool,
    ) -> Result<Option<Document>> {
        let actor = Actor::User(reviewer);
        let updated = self.documents.rescan(document_id, actor, reset_retries).await?;
        if let Some(document) = &updated {
            self.audit
                .record(
                    &AuditEvent::system(
                        AuditEventType::RescanRequested,
                        serde_json::json!({ "reset_retries": reset_retries }),
                    )
                    .for_document(document.id, document.case_id)
                    .by(actor),
                )
                .await?;
        }
        Ok(updated)
    }
}
