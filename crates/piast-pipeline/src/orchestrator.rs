//! The processing orchestrator: claim, fetch, invoke, classify, persist.
//!
//! One call to [`Orchestrator::claim_and_process`] is one attempt on one
//! document. Rate limiting happens before the claim; everything after a
//! successful claim closes with exactly one status transition and exactly one
//! closed ledger row.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use piast_core::models::{AuditEvent, AuditEventType, Document, OcrStatus, ParsedExtraction};
use piast_core::validation::validate_before_dispatch;
use piast_core::{Config, ErrorClass, ProcessError, RetryPolicy};
use piast_db::{DocumentStore, ProcessingLedger};
use piast_ocr::{InvokerSet, OcrInvoker};
use piast_storage::{FileStore, FileStoreError};

use crate::alerts::AlertService;
use crate::outcome::{classify_outcome, ConfidencePolicy, ExtractionDisposition};
use crate::rate_limit::CaseRateLimiter;

/// Chooses the invoker for a document. Trait seam so tests can script the
/// model's behavior.
pub trait InvokerSelector: Send + Sync {
    fn select(&self, document: &Document) -> Arc<dyn OcrInvoker>;
}

impl InvokerSelector for InvokerSet {
    fn select(&self, document: &Document) -> Arc<dyn OcrInvoker> {
        InvokerSet::select(self, document)
    }
}

/// Everything policy-shaped the orchestrator needs, lifted out of [`Config`].
#[derive(Debug, Clone)]
pub struct ProcessingPolicy {
    pub retry: RetryPolicy,
    pub confidence: ConfidencePolicy,
    pub max_image_bytes: u64,
    pub case_rate_limit: u32,
    pub rate_limit_window: Duration,
    pub soft_timeout: Duration,
}

impl ProcessingPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.retry_policy(),
            confidence: ConfidencePolicy {
                modern_threshold: config.modern_confidence_threshold,
                historical_threshold: config.historical_confidence_threshold,
            },
            max_image_bytes: config.max_image_bytes,
            case_rate_limit: config.case_rate_limit,
            rate_limit_window: config.rate_limit_window(),
            soft_timeout: config.ocr_soft_timeout(),
        }
    }
}

/// What one `claim_and_process` call did.
#[derive(Debug)]
pub enum ProcessOutcome {
    Completed(Document),
    NeedsReview(Document),
    RetryScheduled(Document),
    Failed(Document),
    MissingRemoteFile(Document),
    /// Case over its trailing-window limit; document deferred, never claimed.
    RateLimited,
    /// Another worker claimed the document first (or it is no longer due).
    ClaimLost,
}

pub struct Orchestrator {
    documents: Arc<dyn DocumentStore>,
    ledger: Arc<dyn ProcessingLedger>,
    files: Arc<dyn FileStore>,
    invokers: Arc<dyn InvokerSelector>,
    alerts: Arc<AlertService>,
    rate_limiter: CaseRateLimiter,
    policy: ProcessingPolicy,
}

impl Orchestrator {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        ledger: Arc<dyn ProcessingLedger>,
        files: Arc<dyn FileStore>,
        invokers: Arc<dyn InvokerSelector>,
        alerts: Arc<AlertService>,
        policy: ProcessingPolicy,
    ) -> Self {
        let rate_limiter = CaseRateLimiter::new(
            ledger.clone(),
            policy.case_rate_limit,
            policy.rate_limit_window,
        );
        Self {
            documents,
            ledger,
            files,
            invokers,
            alerts,
            rate_limiter,
            policy,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn claim_and_process(&self, document_id: Uuid) -> Result<ProcessOutcome> {
        let Some(document) = self.documents.get_document(document_id).await? else {
            tracing::debug!(document_id = %document_id, "Document vanished before claim");
            return Ok(ProcessOutcome::ClaimLost);
        };
        if document.ocr_status != OcrStatus::Pending {
            return Ok(ProcessOutcome::ClaimLost);
        }

        // Rate limit before the claim: a rejected document keeps its pending
        // status and retry budget, and no OCR call is made.
        if let Err(err) = self.rate_limiter.check(document.case_id).await? {
            self.ledger
                .record_rejection(document.id, document.case_id, err.reason_code())
                .await?;
            let deferred_to = Utc::now()
                + ChronoDuration::from_std(self.policy.retry.base_delay)
                    .unwrap_or(ChronoDuration::seconds(60));
            self.documents.defer_retry(document.id, deferred_to).await?;
            return Ok(ProcessOutcome::RateLimited);
        }

        let Some(document) = self.documents.claim_for_processing(document_id).await? else {
            return Ok(ProcessOutcome::ClaimLost);
        };

        let attempt = self
            .ledger
            .open_attempt(document.id, document.case_id, Some(document.file_size))
            .await?;

        match self.run_attempt(&document).await {
            Ok((extraction, ExtractionDisposition::Accept)) => {
                let extracted = serde_json::to_value(&extraction)
                    .context("Failed to serialize extraction")?;
                self.ledger
                    .complete_attempt(attempt.id, extraction.confidence, extracted.clone())
                    .await?;

                let transcription = extraction.transcription.as_deref().unwrap_or("");
                match self
                    .documents
                    .mark_completed(document.id, extraction.confidence, transcription, extracted)
                    .await?
                {
                    Some(updated) => Ok(ProcessOutcome::Completed(updated)),
                    None => {
                        tracing::warn!(
                            document_id = %document.id,
                            "Document left processing mid-attempt, result discarded"
                        );
                        Ok(ProcessOutcome::ClaimLost)
                    }
                }
            }
            Ok((extraction, ExtractionDisposition::NeedsReview { reason })) => {
                let extracted = serde_json::to_value(&extraction)
                    .context("Failed to serialize extraction")?;
                // The attempt itself succeeded; review routing is a business
                // outcome, not a failure.
                self.ledger
                    .complete_attempt(attempt.id, extraction.confidence, extracted.clone())
                    .await?;

                match self
                    .documents
                    .mark_needs_review(
                        document.id,
                        Some(extraction.confidence),
                        extraction.transcription.as_deref(),
                        Some(extracted),
                        reason,
                    )
                    .await?
                {
                    Some(updated) => Ok(ProcessOutcome::NeedsReview(updated)),
                    None => Ok(ProcessOutcome::ClaimLost),
                }
            }
            Ok((_, ExtractionDisposition::Reject(err))) => {
                self.ledger
                    .fail_attempt(attempt.id, err.reason_code(), &err.to_string())
                    .await?;
                self.apply_failure(&document, err).await
            }
            Err(err) => {
                self.ledger
                    .fail_attempt(attempt.id, err.reason_code(), &err.to_string())
                    .await?;
                self.apply_failure(&document, err).await
            }
        }
    }

    /// Validate, fetch, invoke, classify. Returns the extraction and what to
    /// do with it, or a classified error.
    async fn run_attempt(
        &self,
        document: &Document,
    ) -> Result<(ParsedExtraction, ExtractionDisposition), ProcessError> {
        validate_before_dispatch(document, self.policy.max_image_bytes)?;

        let image_data = self
            .files
            .fetch(&document.storage_path)
            .await
            .map_err(map_file_error)?;

        let invoker = self.invokers.select(document);
        tracing::debug!(
            document_id = %document.id,
            invoker = invoker.name(),
            "Dispatching OCR attempt"
        );

        let extraction =
            match tokio::time::timeout(self.policy.soft_timeout, invoker.extract(&image_data))
                .await
            {
                Ok(result) => result.map_err(ProcessError::from)?,
                Err(_) => {
                    return Err(ProcessError::Transient(format!(
                        "OCR attempt exceeded the {}s soft timeout",
                        self.policy.soft_timeout.as_secs()
                    )))
                }
            };

        let disposition = classify_outcome(
            &extraction,
            document,
            &self.policy.confidence,
            Utc::now().date_naive(),
        );
        Ok((extraction, disposition))
    }

    /// Apply the failure policy for a classified error to a document we hold
    /// in `processing`.
    async fn apply_failure(
        &self,
        document: &Document,
        err: ProcessError,
    ) -> Result<ProcessOutcome> {
        let message = err.to_string();
        let code = err.reason_code();

        let outcome = match err.class() {
            ErrorClass::Validation => self
                .documents
                .mark_failed(document.id, &message, false)
                .await?
                .map(ProcessOutcome::Failed),

            ErrorClass::Transient => {
                let attempts_made = document.ocr_retry_count + 1;
                if self.policy.retry.allows_retry(attempts_made) {
                    let delay = self.policy.retry.delay_for(attempts_made);
                    let next_retry_at = Utc::now()
                        + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::seconds(60));
                    self.documents
                        .schedule_retry(document.id, &message, next_retry_at)
                        .await?
                        .map(ProcessOutcome::RetryScheduled)
                } else {
                    let updated = self
                        .documents
                        .mark_failed(document.id, &message, true)
                        .await?;
                    if updated.is_some() {
                        self.alerts
                            .raise(
                                AuditEvent::system(
                                    AuditEventType::RetriesExhausted,
                                    serde_json::json!({
                                        "reason_code": code,
                                        "attempts": attempts_made,
                                    }),
                                )
                                .for_document(document.id, document.case_id),
                            )
                            .await?;
                    }
                    updated.map(ProcessOutcome::Failed)
                }
            }

            ErrorClass::Persistent => match &err {
                ProcessError::MissingRemoteFile(_) => {
                    let updated = self
                        .documents
                        .mark_missing_remote_file(document.id, &message)
                        .await?;
                    if updated.is_some() {
                        self.alerts
                            .raise(
                                AuditEvent::system(
                                    AuditEventType::MissingRemoteFile,
                                    serde_json::json!({ "reason_code": code }),
                                )
                                .for_document(document.id, document.case_id),
                            )
                            .await?;
                    }
                    updated.map(ProcessOutcome::MissingRemoteFile)
                }
                ProcessError::CreditsExhausted => {
                    let updated = self
                        .documents
                        .mark_failed(document.id, &message, false)
                        .await?;
                    if updated.is_some() {
                        self.alerts
                            .raise(
                                AuditEvent::system(
                                    AuditEventType::CreditsExhausted,
                                    serde_json::json!({ "reason_code": code }),
                                )
                                .for_document(document.id, document.case_id),
                            )
                            .await?;
                    }
                    updated.map(ProcessOutcome::Failed)
                }
                _ => {
                    let updated = self
                        .documents
                        .mark_failed(document.id, &message, false)
                        .await?;
                    if updated.is_some() {
                        self.alerts
                            .raise(
                                AuditEvent::system(
                                    AuditEventType::StorageFailure,
                                    serde_json::json!({ "reason_code": code }),
                                )
                                .for_document(document.id, document.case_id),
                            )
                            .await?;
                    }
                    updated.map(ProcessOutcome::Failed)
                }
            },

            // Fail toward human review, never toward silent completion.
            ErrorClass::Unknown => self
                .documents
                .mark_needs_review(document.id, None, None, None, code)
                .await?
                .map(ProcessOutcome::NeedsReview),
        };

        match outcome {
            Some(outcome) => Ok(outcome),
            None => {
                tracing::warn!(
                    document_id = %document.id,
                    reason_code = code,
                    "Document left processing before failure could be recorded"
                );
                Ok(ProcessOutcome::ClaimLost)
            }
        }
    }
}

fn map_file_error(err: FileStoreError) -> ProcessError {
    match err {
        FileStoreError::NotFound(path) => ProcessError::MissingRemoteFile(path),
        e if e.is_transient() => ProcessError::Transient(e.to_string()),
        e => ProcessError::Storage(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_errors_map_onto_the_taxonomy() {
        assert!(matches!(
            map_file_error(FileStoreError::NotFound("cases/x.jpg".to_string())),
            ProcessError::MissingRemoteFile(_)
        ));
        assert!(matches!(
            map_file_error(FileStoreError::BackendError("503".to_string())),
            ProcessError::Transient(_)
        ));
        assert!(matches!(
            map_file_error(FileStoreError::InvalidPath("..".to_string())),
            ProcessError::Storage(_)
        ));
    }
}
