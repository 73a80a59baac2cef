use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use piast_core::models::{
    Actor, Document, DocumentCategory, DocumentStats, OcrStatus, PersonRole, StatusHistoryEntry,
};

use crate::store::DocumentStore;

const DOCUMENT_COLUMNS: &str = "id, case_id, person_id, name, storage_path, content_type, \
     file_size, category, person_role, metadata, ocr_status, ocr_confidence, ocr_text, \
     ocr_data, ocr_retry_count, ocr_next_retry_at, ocr_error_message, ocr_reviewed_by, \
     ocr_reviewed_at, is_verified_by_hac, data_applied_to_forms, created_at, updated_at";

/// Input for registering a freshly uploaded document with the pipeline.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub case_id: Uuid,
    pub person_id: Option<Uuid>,
    pub name: String,
    pub storage_path: String,
    pub content_type: String,
    pub file_size: i64,
    pub category: DocumentCategory,
    pub person_role: PersonRole,
    pub metadata: serde_json::Value,
}

#[derive(Clone)]
pub struct DocumentRepository {
    pool: PgPool,
}

impl DocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Every status change writes a history row in the same transaction as
    /// the document update, so the walk in `ocr_status_history` always
    /// matches what the document actually went through.
    async fn insert_history(
        tx: &mut Transaction<'_, Postgres>,
        document_id: Uuid,
        from_status: OcrStatus,
        to_status: OcrStatus,
        actor: Actor,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ocr_status_history (document_id, from_status, to_status, actor)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(document_id)
        .bind(from_status.to_string())
        .bind(to_status.to_string())
        .bind(actor.to_string())
        .execute(&mut **tx)
        .await
        .context("Failed to insert status history entry")?;
        Ok(())
    }

    /// Load a document under a row lock so review-style transitions can check
    /// the current status before writing.
    async fn lock_document(
        tx: &mut Transaction<'_, Postgres>,
        document_id: Uuid,
    ) -> Result<Option<Document>> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1 FOR UPDATE");
        sqlx::query_as(&sql)
            .bind(document_id)
            .fetch_optional(&mut **tx)
            .await
            .context("Failed to lock document row")
    }
}

#[async_trait]
impl DocumentStore for DocumentRepository {
    #[tracing::instrument(skip(self, new), fields(case_id = %new.case_id))]
    async fn create_document(&self, new: NewDocument) -> Result<Document> {
        let sql = format!(
            r#"
            INSERT INTO documents (
                case_id, person_id, name, storage_path, content_type,
                file_size, category, person_role, metadata, ocr_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending')
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        let document: Document = sqlx::query_as(&sql)
            .bind(new.case_id)
            .bind(new.person_id)
            .bind(&new.name)
            .bind(&new.storage_path)
            .bind(&new.content_type)
            .bind(new.file_size)
            .bind(new.category.to_string())
            .bind(new.person_role.to_string())
            .bind(&new.metadata)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert document")?;

        tracing::info!(
            document_id = %document.id,
            case_id = %document.case_id,
            category = %document.category,
            "Document registered for processing"
        );

        Ok(document)
    }

    #[tracing::instrument(skip(self))]
    async fn get_document(&self, document_id: Uuid) -> Result<Option<Document>> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1");
        sqlx::query_as(&sql)
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch document")
    }

    #[tracing::instrument(skip(self))]
    async fn due_for_processing(&self, limit: i64) -> Result<Vec<Document>> {
        let sql = format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}
            FROM documents
            WHERE ocr_status = 'pending'
              AND (ocr_next_retry_at IS NULL OR ocr_next_retry_at <= NOW())
            ORDER BY created_at ASC
            LIMIT $1
            "#
        );
        sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch due documents")
    }

    /// The claim is a single conditional update: only one of any number of
    /// concurrent workers gets a row back, the rest see `None` and move on.
    #[tracing::instrument(skip(self))]
    async fn claim_for_processing(&self, document_id: Uuid) -> Result<Option<Document>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin claim transaction")?;

        let sql = format!(
            r#"
            UPDATE documents
            SET ocr_status = 'processing', updated_at = NOW()
            WHERE id = $1
              AND ocr_status = 'pending'
              AND (ocr_next_retry_at IS NULL OR ocr_next_retry_at <= NOW())
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        let document: Option<Document> = sqlx::query_as(&sql)
            .bind(document_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to claim document")?;

        let Some(document) = document else {
            tracing::debug!(document_id = %document_id, "Claim lost or document not due");
            return Ok(None);
        };

        Self::insert_history(
            &mut tx,
            document_id,
            OcrStatus::Pending,
            OcrStatus::Processing,
            Actor::System,
        )
        .await?;

        tx.commit().await.context("Failed to commit claim")?;

        tracing::debug!(
            document_id = %document.id,
            retry_count = document.ocr_retry_count,
            "Document claimed for processing"
        );

        Ok(Some(document))
    }

    #[tracing::instrument(skip(self, transcription, extracted))]
    async fn mark_completed(
        &self,
        document_id: Uuid,
        confidence: f64,
        transcription: &str,
        extracted: serde_json::Value,
    ) -> Result<Option<Document>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin completion transaction")?;

        let sql = format!(
            r#"
            UPDATE documents
            SET ocr_status = 'completed',
                ocr_confidence = $2,
                ocr_text = $3,
                ocr_data = $4,
                ocr_error_message = NULL,
                ocr_next_retry_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND ocr_status = 'processing'
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        let document: Option<Document> = sqlx::query_as(&sql)
            .bind(document_id)
            .bind(confidence)
            .bind(transcription)
            .bind(extracted)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to mark document completed")?;

        let Some(document) = document else {
            return Ok(None);
        };

        Self::insert_history(
            &mut tx,
            document_id,
            OcrStatus::Processing,
            OcrStatus::Completed,
            Actor::System,
        )
        .await?;

        tx.commit().await.context("Failed to commit completion")?;

        tracing::info!(document_id = %document_id, confidence, "Document completed");

        Ok(Some(document))
    }

    #[tracing::instrument(skip(self, transcription, extracted))]
    async fn mark_needs_review(
        &self,
        document_id: Uuid,
        confidence: Option<f64>,
        transcription: Option<&str>,
        extracted: Option<serde_json::Value>,
        reason: &str,
    ) -> Result<Option<Document>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin review-routing transaction")?;

        let sql = format!(
            r#"
            UPDATE documents
            SET ocr_status = 'needs_review',
                ocr_confidence = $2,
                ocr_text = COALESCE($3, ocr_text),
                ocr_data = COALESCE($4, ocr_data),
                ocr_error_message = $5,
                ocr_next_retry_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND ocr_status = 'processing'
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        let document: Option<Document> = sqlx::query_as(&sql)
            .bind(document_id)
            .bind(confidence)
            .bind(transcription)
            .bind(extracted)
            .bind(reason)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to route document to review")?;

        let Some(document) = document else {
            return Ok(None);
        };

        Self::insert_history(
            &mut tx,
            document_id,
            OcrStatus::Processing,
            OcrStatus::NeedsReview,
            Actor::System,
        )
        .await?;

        tx.commit().await.context("Failed to commit review routing")?;

        tracing::info!(document_id = %document_id, reason, "Document routed to review");

        Ok(Some(document))
    }

    #[tracing::instrument(skip(self))]
    async fn schedule_retry(
        &self,
        document_id: Uuid,
        error_message: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Option<Document>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin retry transaction")?;

        let sql = format!(
            r#"
            UPDATE documents
            SET ocr_status = 'pending',
                ocr_retry_count = ocr_retry_count + 1,
                ocr_next_retry_at = $2,
                ocr_error_message = $3,
                updated_at = NOW()
            WHERE id = $1 AND ocr_status = 'processing'
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        let document: Option<Document> = sqlx::query_as(&sql)
            .bind(document_id)
            .bind(next_retry_at)
            .bind(error_message)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to schedule retry")?;

        let Some(document) = document else {
            return Ok(None);
        };

        Self::insert_history(
            &mut tx,
            document_id,
            OcrStatus::Processing,
            OcrStatus::Pending,
            Actor::System,
        )
        .await?;

        tx.commit().await.context("Failed to commit retry")?;

        tracing::warn!(
            document_id = %document_id,
            retry_count = document.ocr_retry_count,
            next_retry_at = %next_retry_at,
            "Retry scheduled after transient failure"
        );

        Ok(Some(document))
    }

    #[tracing::instrument(skip(self))]
    async fn mark_failed(
        &self,
        document_id: Uuid,
        error_message: &str,
        count_attempt: bool,
    ) -> Result<Option<Document>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin failure transaction")?;

        let sql = format!(
            r#"
            UPDATE documents
            SET ocr_status = 'failed',
                ocr_retry_count = ocr_retry_count + CASE WHEN $3 THEN 1 ELSE 0 END,
                ocr_error_message = $2,
                ocr_next_retry_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND ocr_status = 'processing'
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        let document: Option<Document> = sqlx::query_as(&sql)
            .bind(document_id)
            .bind(error_message)
            .bind(count_attempt)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to mark document failed")?;

        let Some(document) = document else {
            return Ok(None);
        };

        Self::insert_history(
            &mut tx,
            document_id,
            OcrStatus::Processing,
            OcrStatus::Failed,
            Actor::System,
        )
        .await?;

        tx.commit().await.context("Failed to commit failure")?;

        tracing::warn!(
            document_id = %document_id,
            retry_count = document.ocr_retry_count,
            error_message,
            "Document failed"
        );

        Ok(Some(document))
    }

    #[tracing::instrument(skip(self))]
    async fn mark_missing_remote_file(
        &self,
        document_id: Uuid,
        error_message: &str,
    ) -> Result<Option<Document>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin missing-file transaction")?;

        // Retry count untouched: the file being gone says nothing about how
        // many OCR attempts the document deserves after a rescan.
        let sql = format!(
            r#"
            UPDATE documents
            SET ocr_status = 'missing_remote_file',
                ocr_error_message = $2,
                ocr_next_retry_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND ocr_status = 'processing'
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        let document: Option<Document> = sqlx::query_as(&sql)
            .bind(document_id)
            .bind(error_message)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to mark document missing")?;

        let Some(document) = document else {
            return Ok(None);
        };

        Self::insert_history(
            &mut tx,
            document_id,
            OcrStatus::Processing,
            OcrStatus::MissingRemoteFile,
            Actor::System,
        )
        .await?;

        tx.commit().await.context("Failed to commit missing-file state")?;

        tracing::warn!(document_id = %document_id, "Source file missing, document parked");

        Ok(Some(document))
    }

    #[tracing::instrument(skip(self))]
    async fn defer_retry(
        &self,
        document_id: Uuid,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Option<Document>> {
        // Status stays `pending` and no history row is written; the document
        // was never claimed.
        let sql = format!(
            r#"
            UPDATE documents
            SET ocr_next_retry_at = $2, updated_at = NOW()
            WHERE id = $1 AND ocr_status = 'pending'
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        sqlx::query_as(&sql)
            .bind(document_id)
            .bind(next_retry_at)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to defer document retry")
    }

    #[tracing::instrument(skip(self, corrected_fields))]
    async fn approve(
        &self,
        document_id: Uuid,
        reviewer: Uuid,
        corrected_fields: Option<serde_json::Value>,
    ) -> Result<Option<Document>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin approval transaction")?;

        let Some(current) = Self::lock_document(&mut tx, document_id).await? else {
            return Ok(None);
        };
        if !current.ocr_status.is_reviewable() {
            tracing::debug!(
                document_id = %document_id,
                status = %current.ocr_status,
                "Approval rejected, document is not reviewable"
            );
            return Ok(None);
        }

        let sql = format!(
            r#"
            UPDATE documents
            SET ocr_status = 'verified',
                ocr_data = COALESCE($2, ocr_data),
                ocr_reviewed_by = $3,
                ocr_reviewed_at = NOW(),
                is_verified_by_hac = TRUE,
                ocr_error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        let document: Document = sqlx::query_as(&sql)
            .bind(document_id)
            .bind(corrected_fields)
            .bind(reviewer)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to approve document")?;

        Self::insert_history(
            &mut tx,
            document_id,
            current.ocr_status,
            OcrStatus::Verified,
            Actor::User(reviewer),
        )
        .await?;

        tx.commit().await.context("Failed to commit approval")?;

        tracing::info!(
            document_id = %document_id,
            reviewer = %reviewer,
            "Extraction verified by reviewer"
        );

        Ok(Some(document))
    }

    #[tracing::instrument(skip(self))]
    async fn request_re_review(
        &self,
        document_id: Uuid,
        reviewer: Uuid,
        reason: &str,
    ) -> Result<Option<Document>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin re-review transaction")?;

        let Some(current) = Self::lock_document(&mut tx, document_id).await? else {
            return Ok(None);
        };
        if current.ocr_status != OcrStatus::Completed {
            return Ok(None);
        }

        let sql = format!(
            r#"
            UPDATE documents
            SET ocr_status = 'needs_review', ocr_error_message = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        let document: Document = sqlx::query_as(&sql)
            .bind(document_id)
            .bind(reason)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to send document back to review")?;

        Self::insert_history(
            &mut tx,
            document_id,
            OcrStatus::Completed,
            OcrStatus::NeedsReview,
            Actor::User(reviewer),
        )
        .await?;

        tx.commit().await.context("Failed to commit re-review")?;

        tracing::info!(document_id = %document_id, reviewer = %reviewer, "Re-review requested");

        Ok(Some(document))
    }

    #[tracing::instrument(skip(self))]
    async fn rescan(
        &self,
        document_id: Uuid,
        actor: Actor,
        reset_retries: bool,
    ) -> Result<Option<Document>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin rescan transaction")?;

        let Some(current) = Self::lock_document(&mut tx, document_id).await? else {
            return Ok(None);
        };
        if !current.ocr_status.can_transition_to(OcrStatus::Pending) {
            tracing::debug!(
                document_id = %document_id,
                status = %current.ocr_status,
                "Rescan rejected from current status"
            );
            return Ok(None);
        }

        let sql = format!(
            r#"
            UPDATE documents
            SET ocr_status = 'pending',
                ocr_retry_count = CASE WHEN $2 THEN 0 ELSE ocr_retry_count END,
                ocr_next_retry_at = NULL,
                ocr_error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        let document: Document = sqlx::query_as(&sql)
            .bind(document_id)
            .bind(reset_retries)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to reset document for rescan")?;

        Self::insert_history(&mut tx, document_id, current.ocr_status, OcrStatus::Pending, actor)
            .await?;

        tx.commit().await.context("Failed to commit rescan")?;

        tracing::info!(
            document_id = %document_id,
            actor = %actor,
            reset_retries,
            "Document queued for rescan"
        );

        Ok(Some(document))
    }

    #[tracing::instrument(skip(self))]
    async fn stuck_in_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Document>> {
        let sql = format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}
            FROM documents
            WHERE ocr_status = 'processing' AND updated_at < $1
            ORDER BY updated_at ASC
            "#
        );
        sqlx::query_as(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .context("Failed to scan for stuck documents")
    }

    #[tracing::instrument(skip(self))]
    async fn status_history(&self, document_id: Uuid) -> Result<Vec<StatusHistoryEntry>> {
        sqlx::query_as(
            r#"
            SELECT id, document_id, from_status, to_status, actor, created_at
            FROM ocr_status_history
            WHERE document_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch status history")
    }

    #[tracing::instrument(skip(self))]
    async fn case_stats(&self, case_id: Uuid) -> Result<DocumentStats> {
        let row: (i64, i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE ocr_status = 'pending'),
                COUNT(*) FILTER (WHERE ocr_status = 'processing'),
                COUNT(*) FILTER (WHERE ocr_status = 'completed'),
                COUNT(*) FILTER (WHERE ocr_status = 'needs_review'),
                COUNT(*) FILTER (WHERE ocr_status = 'failed'),
                COUNT(*) FILTER (WHERE ocr_status = 'missing_remote_file'),
                COUNT(*) FILTER (WHERE ocr_status = 'verified')
            FROM documents
            WHERE case_id = $1
            "#,
        )
        .bind(case_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute case stats")?;

        Ok(DocumentStats {
            total: row.0,
            pending: row.1,
            processing: row.2,
            completed: row.3,
            needs_review: row.4,
            failed: row.5,
            missing_remote_file: row.6,
            verified: row.7,
        })
    }
}
