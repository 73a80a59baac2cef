//! Alert channel for operator-facing pipeline events.
//!
//! The audit row is the source of truth and is always written first; email
//! delivery is best-effort and never fails the pipeline.

use anyhow::Result;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;

use piast_core::models::AuditEvent;
use piast_core::Config;
use piast_db::AuditTrail;

/// Outbound delivery of alert-worthy audit events.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, event: &AuditEvent) -> Result<()>;
}

/// Records every event in the audit log and forwards alert-worthy ones to the
/// configured sink.
pub struct AlertService {
    audit: Arc<dyn AuditTrail>,
    sink: Option<Arc<dyn AlertSink>>,
}

impl AlertService {
    pub fn new(audit: Arc<dyn AuditTrail>, sink: Option<Arc<dyn AlertSink>>) -> Self {
        Self { audit, sink }
    }

    pub async fn raise(&self, event: AuditEvent) -> Result<()> {
        self.audit.record(&event).await?;

        if event.event_type.is_alert() {
            if let Some(sink) = &self.sink {
                if let Err(e) = sink.notify(&event).await {
                    tracing::warn!(
                        error = %e,
                        event_type = %event.event_type,
                        "Alert delivery failed, audit row was written"
                    );
                }
            }
        }
        Ok(())
    }
}

/// SMTP alert delivery. No-op (`from_config` returns `None`) when email
/// alerts are disabled.
pub struct EmailAlertSink {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
}

impl EmailAlertSink {
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        if !config.email_alerts_enabled {
            tracing::debug!("Email alerts disabled");
            return Ok(None);
        }

        let host = config
            .smtp_host
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("SMTP_HOST missing with email alerts enabled"))?;
        let from: Mailbox = config
            .smtp_from
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("SMTP_FROM missing with email alerts enabled"))?
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid SMTP_FROM: {}", e))?;
        let port = config.smtp_port.unwrap_or(587);

        let recipients: Vec<Mailbox> = config
            .alert_recipients
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        if recipients.is_empty() {
            anyhow::bail!("ALERT_RECIPIENTS has no valid addresses with email alerts enabled");
        }

        let builder = if config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| anyhow::anyhow!("Invalid SMTP relay host: {}", e))?
                .port(port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port)
        };
        let builder = if let (Some(user), Some(password)) =
            (config.smtp_user.clone(), config.smtp_password.clone())
        {
            builder.credentials(Credentials::new(user, password))
        } else {
            builder
        };

        tracing::info!(host, port, recipients = recipients.len(), "Email alerts enabled");

        Ok(Some(Self {
            mailer: builder.build(),
            from,
            recipients,
        }))
    }
}

#[async_trait]
impl AlertSink for EmailAlertSink {
    async fn notify(&self, event: &AuditEvent) -> Result<()> {
        let subject = format!("[piast] pipeline alert: {}", event.event_type);
        let body = format!(
            "Event: {}\nDocument: {}\nCase: {}\nDetail: {}\nAt: {}\n",
            event.event_type,
            event
                .document_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            event
                .case_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            event.detail,
            event.created_at.to_rfc3339(),
        );

        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }
        let email = builder
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| anyhow::anyhow!("Failed to build alert email: {}", e))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send alert email: {}", e))?;

        tracing::info!(event_type = %event.event_type, "Alert email sent");
        Ok(())
    }
}
