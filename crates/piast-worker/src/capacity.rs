//! Memory-based capacity gate.
//!
//! Checked before each poll cycle. When memory usage is over the threshold
//! the worker skips claiming for that cycle; pending documents stay claimable
//! by other instances.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use sysinfo::System;

use piast_core::models::{AuditEvent, AuditEventType};
use piast_core::CapacityGate;
use piast_pipeline::AlertService;

pub struct MemoryCapacityGate {
    system: Arc<Mutex<System>>,
    max_usage_percent: f64,
    alerts: Arc<AlertService>,
    /// Whether the gate is currently closed, so the pressure alert fires once
    /// per episode instead of once per poll.
    under_pressure: AtomicBool,
}

impl MemoryCapacityGate {
    pub fn new(max_usage_percent: f64, alerts: Arc<AlertService>) -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            system: Arc::new(Mutex::new(system)),
            max_usage_percent,
            alerts,
            under_pressure: AtomicBool::new(false),
        }
    }

    async fn memory_usage_percent(&self) -> Option<f64> {
        let system = self.system.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut system = system.lock().unwrap_or_else(|p| p.into_inner());
            system.refresh_memory();
            let total = system.total_memory();
            if total == 0 {
                return 0.0;
            }
            (system.used_memory() as f64 / total as f64) * 100.0
        })
        .await;

        match result {
            Ok(percent) => Some(percent),
            Err(e) => {
                tracing::warn!(error = %e, "Memory check failed, leaving capacity gate open");
                None
            }
        }
    }
}

#[async_trait]
impl CapacityGate for MemoryCapacityGate {
    async fn can_accept_work(&self) -> bool {
        let Some(usage_percent) = self.memory_usage_percent().await else {
            return true;
        };

        if usage_percent > self.max_usage_percent {
            if !self.under_pressure.swap(true, Ordering::SeqCst) {
                tracing::warn!(
                    usage_percent,
                    threshold = self.max_usage_percent,
                    "Memory usage over threshold, capacity gate closed"
                );
                if let Err(e) = self
                    .alerts
                    .raise(AuditEvent::system(
                        AuditEventType::CapacityPressure,
                        serde_json::json!({
                            "usage_percent": usage_percent,
                            "threshold": self.max_usage_percent,
                        }),
                    ))
                    .await
                {
                    tracing::error!(error = %e, "Failed to record capacity pressure alert");
                }
            }
            return false;
        }

        if self.under_pressure.swap(false, Ordering::SeqCst) {
            tracing::info!(usage_percent, "Memory pressure cleared, capacity gate open");
        }
        true
    }
}
