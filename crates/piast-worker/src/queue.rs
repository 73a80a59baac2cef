//! Polling queue: claims due documents and dispatches them to the processor
//! under a concurrency limit.
//!
//! Shutdown: [`ProcessingQueue::shutdown`] signals the pool to stop claiming;
//! it does not wait for in-flight attempts. Attempts cut off by process exit
//! are surfaced later by the stuck-document scanner.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;

use piast_core::models::{AuditEvent, AuditEventType, Document};
use piast_core::{CapacityGate, Config};
use piast_db::{DocumentStore, ProcessingLedger};
use piast_pipeline::{AlertService, ProcessOutcome, StuckScanner};

use crate::dispatch::DocumentProcessor;

/// Interval between ledger retention sweeps.
const RETENTION_SWEEP_INTERVAL_SECS: u64 = 3600;

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub batch_size: i64,
    pub poll_interval_ms: u64,
    pub max_concurrent: usize,
    /// Hard ceiling on one attempt, above the orchestrator's soft OCR timeout.
    pub hard_timeout: Duration,
    pub stuck_scan_interval_secs: u64,
    pub log_retention_days: i32,
}

impl QueueConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.worker_batch_size,
            poll_interval_ms: config.worker_poll_interval_ms,
            max_concurrent: config.worker_max_concurrent,
            hard_timeout: config.attempt_hard_timeout(),
            stuck_scan_interval_secs: config.stuck_scan_interval_secs,
            log_retention_days: config.log_retention_days,
        }
    }
}

pub struct ProcessingQueue {
    shutdown_tx: mpsc::Sender<()>,
}

impl ProcessingQueue {
    /// Starts the worker pool plus the stuck-scan and retention side loops.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        processor: Arc<dyn DocumentProcessor>,
        scanner: Arc<StuckScanner>,
        ledger: Arc<dyn ProcessingLedger>,
        alerts: Arc<AlertService>,
        capacity_gate: Option<Arc<dyn CapacityGate>>,
        config: QueueConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(Self::worker_pool(
            documents,
            processor,
            scanner,
            ledger,
            alerts,
            capacity_gate,
            config,
            shutdown_rx,
        ));
        Self { shutdown_tx }
    }

    /// Signals the pool to stop claiming. Returns immediately; in-flight
    /// attempts keep running until they finish or hit the hard timeout.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating processing queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn worker_pool(
        documents: Arc<dyn DocumentStore>,
        processor: Arc<dyn DocumentProcessor>,
        scanner: Arc<StuckScanner>,
        ledger: Arc<dyn ProcessingLedger>,
        alerts: Arc<AlertService>,
        capacity_gate: Option<Arc<dyn CapacityGate>>,
        config: QueueConfig,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!(
            batch_size = config.batch_size,
            poll_interval_ms = config.poll_interval_ms,
            max_concurrent = config.max_concurrent,
            capacity_gate = capacity_gate.is_some(),
            "Processing queue started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        let (scan_shutdown_tx, mut scan_shutdown_rx) = mpsc::channel::<()>(1);
        if config.stuck_scan_interval_secs > 0 {
            let scanner = scanner.clone();
            let scan_interval = Duration::from_secs(config.stuck_scan_interval_secs);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(scan_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = scanner.scan().await {
                                tracing::error!(error = %e, "Stuck document scan failed");
                            }
                        }
                        _ = scan_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        let (sweep_shutdown_tx, mut sweep_shutdown_rx) = mpsc::channel::<()>(1);
        {
            let ledger = ledger.clone();
            let retention_days = config.log_retention_days;
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(RETENTION_SWEEP_INTERVAL_SECS));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let cutoff = Utc::now() - ChronoDuration::days(retention_days as i64);
                            match ledger.delete_finished_older_than(cutoff).await {
                                Ok(0) => {}
                                Ok(deleted) => {
                                    tracing::info!(deleted, "Ledger retention sweep removed old attempts");
                                }
                                Err(e) => tracing::error!(error = %e, "Ledger retention sweep failed"),
                            }
                        }
                        _ = sweep_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Processing queue shutting down");
                    let _ = scan_shutdown_tx.send(()).await;
                    let _ = sweep_shutdown_tx.send(()).await;
                    break;
                }
                _ = sleep(poll_interval) => {
                    Self::poll_cycle(
                        &documents,
                        &processor,
                        &alerts,
                        &semaphore,
                        capacity_gate.as_deref(),
                        &config,
                    ).await;
                }
            }
        }

        tracing::info!("Processing queue stopped");
    }

    async fn poll_cycle(
        documents: &Arc<dyn DocumentStore>,
        processor: &Arc<dyn DocumentProcessor>,
        alerts: &Arc<AlertService>,
        semaphore: &Arc<Semaphore>,
        capacity_gate: Option<&dyn CapacityGate>,
        config: &QueueConfig,
    ) {
        if let Some(gate) = capacity_gate {
            if !gate.can_accept_work().await {
                tracing::debug!("Capacity gate closed, skipping poll cycle");
                return;
            }
        }

        let due = match documents.due_for_processing(config.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query due documents");
                return;
            }
        };
        if due.is_empty() {
            tracing::trace!("No documents due for processing");
            return;
        }

        for document in due {
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::debug!("All workers busy, leaving remaining documents for next poll");
                    break;
                }
            };
            let processor = processor.clone();
            let alerts = alerts.clone();
            let hard_timeout = config.hard_timeout;
            tokio::spawn(async move {
                let _permit = permit;
                Self::run_one(processor, alerts, document, hard_timeout).await;
            });
        }
    }

    #[tracing::instrument(skip_all, fields(document_id = %document.id, case_id = %document.case_id))]
    async fn run_one(
        processor: Arc<dyn DocumentProcessor>,
        alerts: Arc<AlertService>,
        document: Document,
        hard_timeout: Duration,
    ) {
        match tokio::time::timeout(hard_timeout, processor.process(document.id)).await {
            Ok(Ok(outcome)) => match outcome {
                ProcessOutcome::ClaimLost => {
                    tracing::debug!("Claim lost to another worker");
                }
                ProcessOutcome::RateLimited => {
                    tracing::debug!("Deferred by case rate limit");
                }
                outcome => {
                    tracing::info!(outcome = outcome_label(&outcome), "Attempt finished");
                }
            },
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Attempt failed with an unhandled error");
            }
            Err(_) => {
                // The document stays in processing; the stuck scanner will
                // surface it if the attempt never unwinds.
                tracing::error!(
                    timeout_secs = hard_timeout.as_secs(),
                    "Attempt exceeded the hard timeout"
                );
                if let Err(e) = alerts
                    .raise(
                        AuditEvent::system(
                            AuditEventType::AttemptTimedOut,
                            serde_json::json!({ "timeout_secs": hard_timeout.as_secs() }),
                        )
                        .for_document(document.id, document.case_id),
                    )
                    .await
                {
                    tracing::error!(error = %e, "Failed to record attempt timeout alert");
                }
            }
        }
    }
}

fn outcome_label(outcome: &ProcessOutcome) -> &'static str {
    match outcome {
        ProcessOutcome::Completed(_) => "completed",
        ProcessOutcome::NeedsReview(_) => "needs_review",
        ProcessOutcome::RetryScheduled(_) => "retry_scheduled",
        ProcessOutcome::Failed(_) => "failed",
        ProcessOutcome::MissingRemoteFile(_) => "missing_remote_file",
        ProcessOutcome::RateLimited => "rate_limited",
        ProcessOutcome::ClaimLost => "claim_lost",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels_are_snake_case() {
        assert_eq!(outcome_label(&ProcessOutcome::RateLimited), "rate_limited");
        assert_eq!(outcome_label(&ProcessOutcome::ClaimLost), "claim_lost");
    }
}
