use std::sync::Arc;

use piast_core::{CapacityGate, Config};
use piast_db::{
    AuditRepository, AuditTrail, DocumentRepository, DocumentStore, ProcessingLedger,
    ProcessingLogRepository,
};
use piast_ocr::{GatewayClient, InvokerSet};
use piast_pipeline::{
    AlertService, AlertSink, EmailAlertSink, Orchestrator, ProcessingPolicy, StuckScanner,
};
use piast_storage::create_file_store;
use piast_worker::{
    dispatch::DocumentProcessor, MemoryCapacityGate, ProcessingQueue, QueueConfig,
};

// Use mimalloc as the global allocator for lower fragmentation, especially on
// musl-based systems inside containers.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;
    config.validate()?;
    piast_worker::telemetry::init_telemetry(&config);

    let pool = piast_worker::setup::setup_database(&config).await?;

    let documents: Arc<dyn DocumentStore> = Arc::new(DocumentRepository::new(pool.clone()));
    let ledger: Arc<dyn ProcessingLedger> = Arc::new(ProcessingLogRepository::new(pool.clone()));
    let audit: Arc<dyn AuditTrail> = Arc::new(AuditRepository::new(pool.clone()));

    let files = create_file_store(&config).await?;

    let gateway = Arc::new(GatewayClient::new(
        config.gateway_base_url.clone(),
        config.gateway_api_key.clone(),
        config.gateway_model.clone(),
        config.gateway_max_tokens,
        config.max_image_bytes,
        config.ocr_soft_timeout(),
    )?);
    let invokers = Arc::new(InvokerSet::new(gateway));

    let sink = EmailAlertSink::from_config(&config)?.map(|s| Arc::new(s) as Arc<dyn AlertSink>);
    let alerts = Arc::new(AlertService::new(audit, sink));

    let orchestrator = Arc::new(Orchestrator::new(
        documents.clone(),
        ledger.clone(),
        files,
        invokers,
        alerts.clone(),
        ProcessingPolicy::from_config(&config),
    ));

    let scanner = Arc::new(StuckScanner::new(
        documents.clone(),
        alerts.clone(),
        config.stuck_after_secs,
    ));
    let capacity_gate: Arc<dyn CapacityGate> = Arc::new(MemoryCapacityGate::new(
        config.max_memory_usage_percent,
        alerts.clone(),
    ));

    let queue = ProcessingQueue::new(
        documents,
        orchestrator as Arc<dyn DocumentProcessor>,
        scanner,
        ledger,
        alerts,
        Some(capacity_gate),
        QueueConfig::from_config(&config),
    );

    tracing::info!(environment = %config.environment, "Piast worker running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    queue.shutdown().await;
    pool.close().await;

    Ok(())
}
