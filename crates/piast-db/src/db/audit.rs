use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use piast_core::models::AuditEvent;

use crate::store::AuditTrail;

/// Append-only audit log. No update or delete paths exist on purpose.
#[derive(Clone)]
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditTrail for AuditRepository {
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (document_id, case_id, actor, event_type, detail)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.document_id)
        .bind(event.case_id)
        .bind(event.actor.to_string())
        .bind(event.event_type.to_string())
        .bind(&event.detail)
        .execute(&self.pool)
        .await
        .context("Failed to record audit event")?;

        tracing::debug!(event_type = %event.event_type, "Audit event recorded");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn events_for_document(
        &self,
        document_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditEvent>> {
        let rows: Vec<(Option<Uuid>, Option<Uuid>, String, String, serde_json::Value, chrono::DateTime<chrono::Utc>)> =
            sqlx::query_as(
                r#"
                SELECT document_id, case_id, actor, event_type, detail, created_at
                FROM audit_log
                WHERE document_id = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(document_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch audit events")?;

        let mut events = Vec::with_capacity(rows.len());
        for (document_id, case_id, actor, event_type, detail, created_at) in rows {
            events.push(AuditEvent {
                document_id,
                case_id,
                actor: actor.parse().context("Invalid actor in audit log")?,
                event_type: event_type
                    .parse()
                    .context("Invalid event type in audit log")?,
                detail,
                created_at,
            });
        }
        Ok(events)
    }
}
