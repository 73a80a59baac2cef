//! Case-level processing rate limit.
//!
//! The limit is enforced against the attempt ledger, not in-process counters,
//! so it holds across worker instances and restarts.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use piast_core::ProcessError;
use piast_db::ProcessingLedger;

pub struct CaseRateLimiter {
    ledger: Arc<dyn ProcessingLedger>,
    limit: u32,
    window: Duration,
}

impl CaseRateLimiter {
    pub fn new(ledger: Arc<dyn ProcessingLedger>, limit: u32, window: Duration) -> Self {
        Self {
            ledger,
            limit,
            window,
        }
    }

    /// Checked before a claim; a case at its limit is rejected before any
    /// status change or OCR call happens.
    pub async fn check(&self, case_id: Uuid) -> Result<Result<(), ProcessError>> {
        let window = ChronoDuration::from_std(self.window).unwrap_or(ChronoDuration::hours(1));
        let since = Utc::now() - window;
        let count = self.ledger.attempts_started_since(case_id, since).await?;

        if count >= self.limit as i64 {
            tracing::warn!(
                case_id = %case_id,
                attempts_in_window = count,
                limit = self.limit,
                "Case is over its processing rate limit"
            );
            return Ok(Err(ProcessError::CaseRateLimited {
                case_id,
                limit: self.limit,
            }));
        }
        Ok(Ok(()))
    }
}
