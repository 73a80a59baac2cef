use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use piast_core::models::{AttemptStatus, ProcessingLogEntry};

use crate::store::ProcessingLedger;

const LOG_COLUMNS: &str = "id, document_id, case_id, status, started_at, finished_at, \
     input_bytes, confidence, extracted, error_code, error_message";

#[derive(Clone)]
pub struct ProcessingLogRepository {
    pool: PgPool,
}

impl ProcessingLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessingLedger for ProcessingLogRepository {
    #[tracing::instrument(skip(self))]
    async fn open_attempt(
        &self,
        document_id: Uuid,
        case_id: Uuid,
        input_bytes: Option<i64>,
    ) -> Result<ProcessingLogEntry> {
        let sql = format!(
            r#"
            INSERT INTO ocr_processing_log (document_id, case_id, status, input_bytes)
            VALUES ($1, $2, $3, $4)
            RETURNING {LOG_COLUMNS}
            "#
        );
        let entry: ProcessingLogEntry = sqlx::query_as(&sql)
            .bind(document_id)
            .bind(case_id)
            .bind(AttemptStatus::Processing.to_string())
            .bind(input_bytes)
            .fetch_one(&self.pool)
            .await
            .context("Failed to open processing attempt")?;

        tracing::debug!(
            attempt_id = %entry.id,
            document_id = %document_id,
            case_id = %case_id,
            "Processing attempt opened"
        );

        Ok(entry)
    }

    #[tracing::instrument(skip(self, extracted))]
    async fn complete_attempt(
        &self,
        attempt_id: Uuid,
        confidence: f64,
        extracted: serde_json::Value,
    ) -> Result<()> {
        // Rows are closed exactly once; the status guard makes a duplicate
        // close a no-op instead of an overwrite.
        let result = sqlx::query(
            r#"
            UPDATE ocr_processing_log
            SET status = 'completed', finished_at = NOW(), confidence = $2, extracted = $3
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(attempt_id)
        .bind(confidence)
        .bind(extracted)
        .execute(&self.pool)
        .await
        .context("Failed to close processing attempt")?;

        if result.rows_affected() == 0 {
            tracing::warn!(attempt_id = %attempt_id, "Attempt already closed, ignoring");
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fail_attempt(
        &self,
        attempt_id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE ocr_processing_log
            SET status = 'failed', finished_at = NOW(), error_code = $2, error_message = $3
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(attempt_id)
        .bind(error_code)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .context("Failed to close processing attempt as failed")?;

        if result.rows_affected() == 0 {
            tracing::warn!(attempt_id = %attempt_id, "Attempt already closed, ignoring");
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn record_rejection(
        &self,
        document_id: Uuid,
        case_id: Uuid,
        error_code: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ocr_processing_log
                (document_id, case_id, status, started_at, finished_at, error_code)
            VALUES ($1, $2, 'failed', NOW(), NOW(), $3)
            "#,
        )
        .bind(document_id)
        .bind(case_id)
        .bind(error_code)
        .execute(&self.pool)
        .await
        .context("Failed to record rejection")?;

        tracing::debug!(
            document_id = %document_id,
            case_id = %case_id,
            error_code,
            "Rejection recorded in ledger"
        );

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn attempts_started_since(&self, case_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        // Rejection rows carry started_at == finished_at and never passed
        // through the processing status, so counting only real attempts means
        // excluding rows closed in the same instant they opened with no work
        // done. They are keyed by their error code instead.
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM ocr_processing_log
            WHERE case_id = $1
              AND started_at >= $2
              AND (error_code IS NULL OR error_code <> 'rate_limited')
            "#,
        )
        .bind(case_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count attempts in window")?;

        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn attempts_for_document(&self, document_id: Uuid) -> Result<Vec<ProcessingLogEntry>> {
        let sql = format!(
            r#"
            SELECT {LOG_COLUMNS}
            FROM ocr_processing_log
            WHERE document_id = $1
            ORDER BY started_at ASC
            "#
        );
        sqlx::query_as(&sql)
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch attempts for document")
    }

    #[tracing::instrument(skip(self))]
    async fn delete_finished_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM ocr_processing_log
            WHERE status <> 'processing' AND finished_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("Failed to delete old ledger rows")?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(deleted, cutoff = %cutoff, "Old ledger rows removed");
        }
        Ok(deleted)
    }
}
