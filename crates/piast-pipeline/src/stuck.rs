//! Stuck-document scanner.
//!
//! Reports documents sitting in `processing` past the cutoff. Report-only by
//! design: a stuck document means a worker died or hung mid-attempt, and
//! silently requeuing it could double-charge the case's rate budget, so a
//! human decides via rescan.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use piast_core::models::{AuditEvent, AuditEventType};
use piast_db::DocumentStore;

use crate::alerts::AlertService;

pub struct StuckScanner {
    documents: Arc<dyn DocumentStore>,
    alerts: Arc<AlertService>,
    stuck_after: ChronoDuration,
    /// Documents already reported, so a long-stuck document alerts once per
    /// worker lifetime instead of once per scan tick.
    reported: Mutex<HashSet<Uuid>>,
}

impl StuckScanner {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        alerts: Arc<AlertService>,
        stuck_after_secs: i64,
    ) -> Self {
        Self {
            documents,
            alerts,
            stuck_after: ChronoDuration::seconds(stuck_after_secs),
            reported: Mutex::new(HashSet::new()),
        }
    }

    /// One scan pass. Returns how many newly stuck documents were reported.
    #[tracing::instrument(skip(self))]
    pub async fn scan(&self) -> Result<usize> {
        let cutoff = Utc::now() - self.stuck_after;
        let stuck = self.documents.stuck_in_processing(cutoff).await?;

        let mut reported = self.reported.lock().await;
        // Anything no longer stuck can be reported again if it gets stuck later.
        let stuck_ids: HashSet<Uuid> = stuck.iter().map(|d| d.id).collect();
        reported.retain(|id| stuck_ids.contains(id));

        let mut newly_reported = 0;
        for document in stuck {
            if !reported.insert(document.id) {
                continue;
            }
            let stuck_minutes = (Utc::now() - document.updated_at).num_minutes();
            tracing::warn!(
                document_id = %document.id,
                case_id = %document.case_id,
                stuck_minutes,
                "Document stuck in processing"
            );
            self.alerts
                .raise(
                    AuditEvent::system(
                        AuditEventType::StuckInProcessing,
                        serde_json::json!({ "stuck_minutes": stuck_minutes }),
                    )
                    .for_document(document.id, document.case_id),
                )
                .await?;
            newly_reported += 1;
        }

        Ok(newly_reported)
    }
}
