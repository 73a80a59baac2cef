//! Seam between the queue loop and the processing orchestrator.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use piast_pipeline::{Orchestrator, ProcessOutcome};

/// One attempt on one document. The queue only knows document ids; claiming,
/// rate limiting, and persistence all live behind this seam.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    async fn process(&self, document_id: Uuid) -> Result<ProcessOutcome>;
}

#[async_trait]
impl DocumentProcessor for Orchestrator {
    async fn process(&self, document_id: Uuid) -> Result<ProcessOutcome> {
        self.claim_and_process(document_id).await
    }
}
