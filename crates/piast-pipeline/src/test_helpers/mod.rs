//! In-memory fakes for pipeline tests.
//!
//! [`InMemoryStore`] mirrors the conditional-update semantics of the real
//! repositories (status guards, history rows, append-only ledger) under a
//! single mutex, which makes the double-claim race observable in tests.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use piast_core::models::{
    Actor, AttemptStatus, AuditEvent, Document, DocumentCategory, DocumentStats, ExtractedFields,
    OcrStatus, ParsedExtraction, PersonRole, ProcessingLogEntry, StatusHistoryEntry,
};
use piast_db::{AuditTrail, DocumentStore, NewDocument, ProcessingLedger};
use piast_ocr::{OcrError, OcrInvoker};
use piast_storage::{FileStore, FileStoreError, FileStoreResult};

use crate::alerts::AlertSink;
use crate::orchestrator::InvokerSelector;

#[derive(Default)]
struct State {
    documents: HashMap<Uuid, Document>,
    history: Vec<StatusHistoryEntry>,
    ledger: Vec<ProcessingLogEntry>,
    audit: Vec<AuditEvent>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_document(&self, document: Document) {
        self.lock().documents.insert(document.id, document);
    }

    pub fn document(&self, document_id: Uuid) -> Option<Document> {
        self.lock().documents.get(&document_id).cloned()
    }

    pub fn history(&self, document_id: Uuid) -> Vec<StatusHistoryEntry> {
        self.lock()
            .history
            .iter()
            .filter(|h| h.document_id == document_id)
            .cloned()
            .collect()
    }

    pub fn ledger_entries(&self, document_id: Uuid) -> Vec<ProcessingLogEntry> {
        self.lock()
            .ledger
            .iter()
            .filter(|e| e.document_id == document_id)
            .cloned()
            .collect()
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.lock().audit.clone()
    }

    fn push_history(state: &mut State, document_id: Uuid, from: OcrStatus, to: OcrStatus, actor: Actor) {
        state.history.push(StatusHistoryEntry {
            id: Uuid::new_v4(),
            document_id,
            from_status: from,
            to_status: to,
            actor,
            created_at: Utc::now(),
        });
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn create_document(&self, new: NewDocument) -> Result<Document> {
        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4(),
            case_id: new.case_id,
            person_id: new.person_id,
            name: new.name,
            storage_path: new.storage_path,
            content_type: new.content_type,
            file_size: new.file_size,
            category: new.category,
            person_role: new.person_role,
            metadata: new.metadata,
            ocr_status: OcrStatus::Pending,
            ocr_confidence: None,
            ocr_text: None,
            ocr_data: None,
            ocr_retry_count: 0,
            ocr_next_retry_at: None,
            ocr_error_message: None,
            ocr_reviewed_by: None,
            ocr_reviewed_at: None,
            is_verified_by_hac: false,
            data_applied_to_forms: false,
            created_at: now,
            updated_at: now,
        };
        self.insert_document(document.clone());
        Ok(document)
    }

    async fn get_document(&self, document_id: Uuid) -> Result<Option<Document>> {
        Ok(self.document(document_id))
    }

    async fn due_for_processing(&self, limit: i64) -> Result<Vec<Document>> {
        let state = self.lock();
        let mut due: Vec<Document> = state
            .documents
            .values()
            .filter(|d| d.is_due_for_processing())
            .cloned()
            .collect();
        due.sort_by_key(|d| d.created_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn claim_for_processing(&self, document_id: Uuid) -> Result<Option<Document>> {
        let mut state = self.lock();
        let Some(document) = state.documents.get_mut(&document_id) else {
            return Ok(None);
        };
        if !document.is_due_for_processing() {
            return Ok(None);
        }
        document.ocr_status = OcrStatus::Processing;
        document.updated_at = Utc::now();
        let claimed = document.clone();
        Self::push_history(
            &mut state,
            document_id,
            OcrStatus::Pending,
            OcrStatus::Processing,
            Actor::System,
        );
        Ok(Some(claimed))
    }

    async fn mark_completed(
        &self,
        document_id: Uuid,
        confidence: f64,
        transcription: &str,
        extracted: serde_json::Value,
    ) -> Result<Option<Document>> {
        let mut state = self.lock();
        let Some(document) = state.documents.get_mut(&document_id) else {
            return Ok(None);
        };
        if document.ocr_status != OcrStatus::Processing {
            return Ok(None);
        }
        document.ocr_status = OcrStatus::Completed;
        document.ocr_confidence = Some(confidence);
        document.ocr_text = Some(transcription.to_string());
        document.ocr_data = Some(extracted);
        document.ocr_error_message = None;
        document.ocr_next_retry_at = None;
        document.updated_at = Utc::now();
        let updated = document.clone();
        Self::push_history(
            &mut state,
            document_id,
            OcrStatus::Processing,
            OcrStatus::Completed,
            Actor::System,
        );
        Ok(Some(updated))
    }

    async fn mark_needs_review(
        &self,
        document_id: Uuid,
        confidence: Option<f64>,
        transcription: Option<&str>,
        extracted: Option<serde_json::Value>,
        reason: &str,
    ) -> Result<Option<Document>> {
        let mut state = self.lock();
        let Some(document) = state.documents.get_mut(&document_id) else {
            return Ok(None);
        };
        if document.ocr_status != OcrStatus::Processing {
            return Ok(None);
        }
        document.ocr_status = OcrStatus::NeedsReview;
        document.ocr_confidence = confidence;
        if let Some(text) = transcription {
            document.ocr_text = Some(text.to_string());
        }
        if let Some(data) = extracted {
            document.ocr_data = Some(data);
        }
        document.ocr_error_message = Some(reason.to_string());
        document.ocr_next_retry_at = None;
        document.updated_at = Utc::now();
        let updated = document.clone();
        Self::push_history(
            &mut state,
            document_id,
            OcrStatus::Processing,
            OcrStatus::NeedsReview,
            Actor::System,
        );
        Ok(Some(updated))
    }

    async fn schedule_retry(
        &self,
        document_id: Uuid,
        error_message: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Option<Document>> {
        let mut state = self.lock();
        let Some(document) = state.documents.get_mut(&document_id) else {
            return Ok(None);
        };
        if document.ocr_status != OcrStatus::Processing {
            return Ok(None);
        }
        document.ocr_status = OcrStatus::Pending;
        document.ocr_retry_count += 1;
        document.ocr_next_retry_at = Some(next_retry_at);
        document.ocr_error_message = Some(error_message.to_string());
        document.updated_at = Utc::now();
        let updated = document.clone();
        Self::push_history(
            &mut state,
            document_id,
            OcrStatus::Processing,
            OcrStatus::Pending,
            Actor::System,
        );
        Ok(Some(updated))
    }

    async fn mark_failed(
        &self,
        document_id: Uuid,
        error_message: &str,
        count_attempt: bool,
    ) -> Result<Option<Document>> {
        let mut state = self.lock();
        let Some(document) = state.documents.get_mut(&document_id) else {
            return Ok(None);
        };
        if document.ocr_status != OcrStatus::Processing {
            return Ok(None);
        }
        document.ocr_status = OcrStatus::Failed;
        if count_attempt {
            document.ocr_retry_count += 1;
        }
        document.ocr_error_message = Some(error_message.to_string());
        document.ocr_next_retry_at = None;
        document.updated_at = Utc::now();
        let updated = document.clone();
        Self::push_history(
            &mut state,
            document_id,
            OcrStatus::Processing,
            OcrStatus::Failed,
            Actor::System,
        );
        Ok(Some(updated))
    }

    async fn mark_missing_remote_file(
        &self,
        document_id: Uuid,
        error_message: &str,
    ) -> Result<Option<Document>> {
        let mut state = self.lock();
        let Some(document) = state.documents.get_mut(&document_id) else {
            return Ok(None);
        };
        if document.ocr_status != OcrStatus::Processing {
            return Ok(None);
        }
        document.ocr_status = OcrStatus::MissingRemoteFile;
        document.ocr_error_message = Some(error_message.to_string());
        document.ocr_next_retry_at = None;
        document.updated_at = Utc::now();
        let updated = document.clone();
        Self::push_history(
            &mut state,
            document_id,
            OcrStatus::Processing,
            OcrStatus::MissingRemoteFile,
            Actor::System,
        );
        Ok(Some(updated))
    }

    async fn defer_retry(
        &self,
        document_id: Uuid,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Option<Document>> {
        let mut state = self.lock();
        let Some(document) = state.documents.get_mut(&document_id) else {
            return Ok(None);
        };
        if document.ocr_status != OcrStatus::Pending {
            return Ok(None);
        }
        document.ocr_next_retry_at = Some(next_retry_at);
        document.updated_at = Utc::now();
        Ok(Some(document.clone()))
    }

    async fn approve(
        &self,
        document_id: Uuid,
        reviewer: Uuid,
        corrected_fields: Option<serde_json::Value>,
    ) -> Result<Option<Document>> {
        let mut state = self.lock();
        let Some(document) = state.documents.get_mut(&document_id) else {
            return Ok(None);
        };
        if !document.ocr_status.is_reviewable() {
            return Ok(None);
        }
        let from = document.ocr_status;
        document.ocr_status = OcrStatus::Verified;
        if let Some(fields) = corrected_fields {
            document.ocr_data = Some(fields);
        }
        document.ocr_reviewed_by = Some(reviewer);
        document.ocr_reviewed_at = Some(Utc::now());
        document.is_verified_by_hac = true;
        document.ocr_error_message = None;
        document.updated_at = Utc::now();
        let updated = document.clone();
        Self::push_history(
            &mut state,
            document_id,
            from,
            OcrStatus::Verified,
            Actor::User(reviewer),
        );
        Ok(Some(updated))
    }

    async fn request_re_review(
        &self,
        document_id: Uuid,
        reviewer: Uuid,
        reason: &str,
    ) -> Result<Option<Document>> {
        let mut state = self.lock();
        let Some(document) = state.documents.get_mut(&document_id) else {
            return Ok(None);
        };
        if document.ocr_status != OcrStatus::Completed {
            return Ok(None);
        }
        document.ocr_status = OcrStatus::NeedsReview;
        document.ocr_error_message = Some(reason.to_string());
        document.updated_at = Utc::now();
        let updated = document.clone();
        Self::push_history(
            &mut state,
            document_id,
            OcrStatus::Completed,
            OcrStatus::NeedsReview,
            Actor::User(reviewer),
        );
        Ok(Some(updated))
    }

    async fn rescan(
        &self,
        document_id: Uuid,
        actor: Actor,
        reset_retries: bool,
    ) -> Result<Option<Document>> {
        let mut state = self.lock();
        let Some(document) = state.documents.get_mut(&document_id) else {
            return Ok(None);
        };
        if !document.ocr_status.can_transition_to(OcrStatus::Pending) {
            return Ok(None);
        }
        let from = document.ocr_status;
        document.ocr_status = OcrStatus::Pending;
        if reset_retries {
            document.ocr_retry_count = 0;
        }
        document.ocr_next_retry_at = None;
        document.ocr_error_message = None;
        document.updated_at = Utc::now();
        let updated = document.clone();
        Self::push_history(&mut state, document_id, from, OcrStatus::Pending, actor);
        Ok(Some(updated))
    }

    async fn stuck_in_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Document>> {
        let state = self.lock();
        Ok(state
            .documents
            .values()
            .filter(|d| d.ocr_status == OcrStatus::Processing && d.updated_at < cutoff)
            .cloned()
            .collect())
    }

    async fn status_history(&self, document_id: Uuid) -> Result<Vec<StatusHistoryEntry>> {
        Ok(self.history(document_id))
    }

    async fn case_stats(&self, case_id: Uuid) -> Result<DocumentStats> {
        let state = self.lock();
        let mut stats = DocumentStats::default();
        for document in state.documents.values().filter(|d| d.case_id == case_id) {
            stats.total += 1;
            match document.ocr_status {
                OcrStatus::Pending => stats.pending += 1,
                OcrStatus::Processing => stats.processing += 1,
                OcrStatus::Completed => stats.completed += 1,
                OcrStatus::NeedsReview => stats.needs_review += 1,
                OcrStatus::Failed => stats.failed += 1,
                OcrStatus::MissingRemoteFile => stats.missing_remote_file += 1,
                OcrStatus::Verified => stats.verified += 1,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl ProcessingLedger for InMemoryStore {
    async fn open_attempt(
        &self,
        document_id: Uuid,
        case_id: Uuid,
        input_bytes: Option<i64>,
    ) -> Result<ProcessingLogEntry> {
        let entry = ProcessingLogEntry {
            id: Uuid::new_v4(),
            document_id,
            case_id,
            status: AttemptStatus::Processing,
            started_at: Utc::now(),
            finished_at: None,
            input_bytes,
            confidence: None,
            extracted: None,
            error_code: None,
            error_message: None,
        };
        self.lock().ledger.push(entry.clone());
        Ok(entry)
    }

    async fn complete_attempt(
        &self,
        attempt_id: Uuid,
        confidence: f64,
        extracted: serde_json::Value,
    ) -> Result<()> {
        let mut state = self.lock();
        if let Some(entry) = state
            .ledger
            .iter_mut()
            .find(|e| e.id == attempt_id && e.status == AttemptStatus::Processing)
        {
            entry.status = AttemptStatus::Completed;
            entry.finished_at = Some(Utc::now());
            entry.confidence = Some(confidence);
            entry.extracted = Some(extracted);
        }
        Ok(())
    }

    async fn fail_attempt(
        &self,
        attempt_id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        if let Some(entry) = state
            .ledger
            .iter_mut()
            .find(|e| e.id == attempt_id && e.status == AttemptStatus::Processing)
        {
            entry.status = AttemptStatus::Failed;
            entry.finished_at = Some(Utc::now());
            entry.error_code = Some(error_code.to_string());
            entry.error_message = Some(error_message.to_string());
        }
        Ok(())
    }

    async fn record_rejection(
        &self,
        document_id: Uuid,
        case_id: Uuid,
        error_code: &str,
    ) -> Result<()> {
        let now = Utc::now();
        self.lock().ledger.push(ProcessingLogEntry {
            id: Uuid::new_v4(),
            document_id,
            case_id,
            status: AttemptStatus::Failed,
            started_at: now,
            finished_at: Some(now),
            input_bytes: None,
            confidence: None,
            extracted: None,
            error_code: Some(error_code.to_string()),
            error_message: None,
        });
        Ok(())
    }

    async fn attempts_started_since(&self, case_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        let state = self.lock();
        Ok(state
            .ledger
            .iter()
            .filter(|e| {
                e.case_id == case_id
                    && e.started_at >= since
                    && e.error_code.as_deref() != Some("rate_limited")
            })
            .count() as i64)
    }

    async fn attempts_for_document(&self, document_id: Uuid) -> Result<Vec<ProcessingLogEntry>> {
        Ok(self.ledger_entries(document_id))
    }

    async fn delete_finished_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.lock();
        let before = state.ledger.len();
        state.ledger.retain(|e| {
            e.status == AttemptStatus::Processing
                || e.finished_at.map(|at| at >= cutoff).unwrap_or(true)
        });
        Ok((before - state.ledger.len()) as u64)
    }
}

#[async_trait]
impl AuditTrail for InMemoryStore {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        self.lock().audit.push(event.clone());
        Ok(())
    }

    async fn events_for_document(
        &self,
        document_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditEvent>> {
        let state = self.lock();
        Ok(state
            .audit
            .iter()
            .filter(|e| e.document_id == Some(document_id))
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// Scripted invoker: pops pre-loaded results and counts calls.
#[derive(Default)]
pub struct ScriptedInvoker {
    script: Mutex<VecDeque<Result<ParsedExtraction, OcrError>>>,
    calls: AtomicUsize,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, extraction: ParsedExtraction) {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(Ok(extraction));
    }

    pub fn push_err(&self, err: OcrError) {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrInvoker for ScriptedInvoker {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn extract(&self, _image_data: &[u8]) -> Result<ParsedExtraction, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Err(OcrError::MalformedResponse(
                    "invoker script exhausted".to_string(),
                ))
            })
    }
}

/// Selector that always returns the same invoker.
pub struct FixedSelector {
    invoker: std::sync::Arc<ScriptedInvoker>,
}

impl FixedSelector {
    pub fn new(invoker: std::sync::Arc<ScriptedInvoker>) -> Self {
        Self { invoker }
    }
}

impl InvokerSelector for FixedSelector {
    fn select(&self, _document: &Document) -> std::sync::Arc<dyn OcrInvoker> {
        self.invoker.clone()
    }
}

/// File store over a hash map, with an optional budget of injected transient
/// failures.
#[derive(Default)]
pub struct StaticFileStore {
    files: Mutex<HashMap<String, Bytes>>,
    transient_failures: AtomicUsize,
}

impl StaticFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(path.to_string(), Bytes::copy_from_slice(data));
    }

    /// The next `count` fetches fail with a transient backend error.
    pub fn fail_next(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl FileStore for StaticFileStore {
    async fn fetch(&self, storage_path: &str) -> FileStoreResult<Bytes> {
        if self.take_failure() {
            return Err(FileStoreError::BackendError("injected failure".to_string()));
        }
        self.files
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(storage_path)
            .cloned()
            .ok_or_else(|| FileStoreError::NotFound(storage_path.to_string()))
    }

    async fn exists(&self, storage_path: &str) -> FileStoreResult<bool> {
        Ok(self
            .files
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(storage_path))
    }

    async fn content_length(&self, storage_path: &str) -> FileStoreResult<u64> {
        self.files
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(storage_path)
            .map(|b| b.len() as u64)
            .ok_or_else(|| FileStoreError::NotFound(storage_path.to_string()))
    }
}

/// Alert sink that records notifications for assertions.
#[derive(Default)]
pub struct RecordingAlertSink {
    notified: Mutex<Vec<AuditEvent>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<AuditEvent> {
        self.notified
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify(&self, event: &AuditEvent) -> Result<()> {
        self.notified
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// A pending birth-certificate document ready for processing, with its image
/// expected at `cases/test/scan.jpg`.
pub fn pending_document(case_id: Uuid) -> Document {
    let now = Utc::now();
    Document {
        id: Uuid::new_v4(),
        case_id,
        person_id: None,
        name: "akt-urodzenia.jpg".to_string(),
        storage_path: "cases/test/scan.jpg".to_string(),
        content_type: "image/jpeg".to_string(),
        file_size: 120_000,
        category: DocumentCategory::BirthCertificate,
        person_role: PersonRole::Grandparent,
        metadata: serde_json::json!({}),
        ocr_status: OcrStatus::Pending,
        ocr_confidence: None,
        ocr_text: None,
        ocr_data: None,
        ocr_retry_count: 0,
        ocr_next_retry_at: None,
        ocr_error_message: None,
        ocr_reviewed_by: None,
        ocr_reviewed_at: None,
        is_verified_by_hac: false,
        data_applied_to_forms: false,
        created_at: now,
        updated_at: now,
    }
}

/// A civil-record extraction with the given confidence and no warnings.
pub fn civil_extraction(confidence: f64) -> ParsedExtraction {
    ParsedExtraction {
        document_kind: piast_core::models::DocumentKind::BirthCertificate,
        confidence,
        transcription: Some("Akt urodzenia nr 12/1932".to_string()),
        warnings: vec![],
        fields: ExtractedFields::CivilRecord {
            person_name: Some("Jan Kowalski".to_string()),
            event_date: None,
            event_place: Some("Kraków".to_string()),
            father_name: None,
            mother_name: None,
            registry_office: None,
            record_number: Some("12/1932".to_string()),
        },
        translated_fields: None,
    }
}
