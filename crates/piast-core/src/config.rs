//! Configuration module
//!
//! Env-based configuration for the pipeline worker and its services: database,
//! file storage, AI gateway, retry/confidence policy, and alerting.

use std::env;
use std::time::Duration;

use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY_SECS, DEFAULT_MAX_DELAY_SECS, DEFAULT_MAX_RETRIES};

const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MAX_IMAGE_SIZE_MB: u64 = 10;
const OCR_SOFT_TIMEOUT_SECS: u64 = 270;
const ATTEMPT_HARD_TIMEOUT_SECS: u64 = 600;
const MODERN_CONFIDENCE_THRESHOLD: f64 = 0.85;
const HISTORICAL_CONFIDENCE_THRESHOLD: f64 = 0.75;
const CASE_RATE_LIMIT: u32 = 10;
const RATE_LIMIT_WINDOW_SECS: u64 = 3600;
const WORKER_BATCH_SIZE: i64 = 25;
const WORKER_POLL_INTERVAL_MS: u64 = 1000;
const WORKER_MAX_CONCURRENT: usize = 4;
const STUCK_AFTER_SECS: i64 = 600;
const STUCK_SCAN_INTERVAL_SECS: u64 = 60;
const LOG_RETENTION_DAYS: i32 = 30;
const MAX_MEMORY_USAGE_PERCENT: f64 = 85.0;
const GATEWAY_MAX_TOKENS: u32 = 4096;

/// Application configuration for the document pipeline.
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    // AI gateway
    pub gateway_base_url: String,
    pub gateway_api_key: String,
    pub gateway_model: String,
    pub gateway_max_tokens: u32,
    // File storage
    pub storage_backend: String,
    pub local_storage_path: Option<String>,
    pub remote_file_base_url: Option<String>,
    pub remote_file_token: Option<String>,
    // Processing limits and policy
    pub max_image_bytes: u64,
    pub ocr_soft_timeout_secs: u64,
    pub attempt_hard_timeout_secs: u64,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub max_retries: i32,
    pub modern_confidence_threshold: f64,
    pub historical_confidence_threshold: f64,
    pub case_rate_limit: u32,
    pub rate_limit_window_secs: u64,
    // Worker
    pub worker_batch_size: i64,
    pub worker_poll_interval_ms: u64,
    pub worker_max_concurrent: usize,
    pub stuck_after_secs: i64,
    pub stuck_scan_interval_secs: u64,
    pub log_retention_days: i32,
    pub max_memory_usage_percent: f64,
    // Email / alert notifications
    pub email_alerts_enabled: bool,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub smtp_tls: bool,
    pub alert_recipients: Vec<String>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let alert_recipients: Vec<String> = env::var("ALERT_RECIPIENTS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let config = Config {
            environment,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            gateway_base_url: env::var("AI_GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
            gateway_api_key: env::var("AI_GATEWAY_API_KEY")
                .map_err(|_| anyhow::anyhow!("AI_GATEWAY_API_KEY must be set"))?,
            gateway_model: env::var("AI_GATEWAY_MODEL")
                .unwrap_or_else(|_| "google/gemini-2.5-flash".to_string()),
            gateway_max_tokens: env_or("AI_GATEWAY_MAX_TOKENS", GATEWAY_MAX_TOKENS),
            storage_backend: env::var("FILE_STORAGE_BACKEND")
                .unwrap_or_else(|_| "local".to_string())
                .to_lowercase(),
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            remote_file_base_url: env::var("REMOTE_FILE_BASE_URL").ok(),
            remote_file_token: env::var("REMOTE_FILE_TOKEN").ok(),
            max_image_bytes: env_or("MAX_IMAGE_SIZE_MB", MAX_IMAGE_SIZE_MB) * 1024 * 1024,
            ocr_soft_timeout_secs: env_or("OCR_SOFT_TIMEOUT_SECS", OCR_SOFT_TIMEOUT_SECS),
            attempt_hard_timeout_secs: env_or(
                "ATTEMPT_HARD_TIMEOUT_SECS",
                ATTEMPT_HARD_TIMEOUT_SECS,
            ),
            retry_base_delay_secs: env_or("RETRY_BASE_DELAY_SECS", DEFAULT_BASE_DELAY_SECS),
            retry_max_delay_secs: env_or("RETRY_MAX_DELAY_SECS", DEFAULT_MAX_DELAY_SECS),
            max_retries: env_or("OCR_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            modern_confidence_threshold: env_or(
                "MODERN_CONFIDENCE_THRESHOLD",
                MODERN_CONFIDENCE_THRESHOLD,
            ),
            historical_confidence_threshold: env_or(
                "HISTORICAL_CONFIDENCE_THRESHOLD",
                HISTORICAL_CONFIDENCE_THRESHOLD,
            ),
            case_rate_limit: env_or("CASE_RATE_LIMIT", CASE_RATE_LIMIT),
            rate_limit_window_secs: env_or("RATE_LIMIT_WINDOW_SECS", RATE_LIMIT_WINDOW_SECS),
            worker_batch_size: env_or("WORKER_BATCH_SIZE", WORKER_BATCH_SIZE),
            worker_poll_interval_ms: env_or("WORKER_POLL_INTERVAL_MS", WORKER_POLL_INTERVAL_MS),
            worker_max_concurrent: env_or("WORKER_MAX_CONCURRENT", WORKER_MAX_CONCURRENT),
            stuck_after_secs: env_or("STUCK_AFTER_SECS", STUCK_AFTER_SECS),
            stuck_scan_interval_secs: env_or("STUCK_SCAN_INTERVAL_SECS", STUCK_SCAN_INTERVAL_SECS),
            log_retention_days: env_or("LOG_RETENTION_DAYS", LOG_RETENTION_DAYS),
            max_memory_usage_percent: env_or("MAX_MEMORY_USAGE_PERCENT", MAX_MEMORY_USAGE_PERCENT),
            email_alerts_enabled: env_or("EMAIL_ALERTS_ENABLED", false),
            smtp_host: env::var("SMTP_HOST").ok(),
            smtp_port: env::var("SMTP_PORT").ok().and_then(|s| s.parse().ok()),
            smtp_user: env::var("SMTP_USER").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM").ok(),
            smtp_tls: env_or("SMTP_TLS", true),
            alert_recipients,
        };

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !(0.0..=1.0).contains(&self.modern_confidence_threshold)
            || !(0.0..=1.0).contains(&self.historical_confidence_threshold)
        {
            return Err(anyhow::anyhow!(
                "Confidence thresholds must be within [0, 1]"
            ));
        }
        if self.max_retries < 0 {
            return Err(anyhow::anyhow!("OCR_MAX_RETRIES cannot be negative"));
        }
        if self.case_rate_limit == 0 || self.rate_limit_window_secs == 0 {
            return Err(anyhow::anyhow!(
                "Case rate limit and window must both be positive"
            ));
        }
        if self.ocr_soft_timeout_secs >= self.attempt_hard_timeout_secs {
            return Err(anyhow::anyhow!(
                "OCR_SOFT_TIMEOUT_SECS must be below ATTEMPT_HARD_TIMEOUT_SECS"
            ));
        }
        match self.storage_backend.as_str() {
            "local" => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set for the local storage backend"
                    ));
                }
            }
            "http" => {
                if self.remote_file_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "REMOTE_FILE_BASE_URL must be set for the http storage backend"
                    ));
                }
            }
            other => {
                return Err(anyhow::anyhow!("Unknown FILE_STORAGE_BACKEND: {}", other));
            }
        }
        if self.email_alerts_enabled && self.smtp_host.is_none() {
            return Err(anyhow::anyhow!(
                "SMTP_HOST must be set when EMAIL_ALERTS_ENABLED=true"
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(self.retry_base_delay_secs),
            max_delay: Duration::from_secs(self.retry_max_delay_secs),
            max_retries: self.max_retries,
        }
    }

    pub fn ocr_soft_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_soft_timeout_secs)
    }

    pub fn attempt_hard_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_hard_timeout_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            environment: "development".to_string(),
            database_url: "postgresql://localhost/piast".to_string(),
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            gateway_base_url: "https://openrouter.ai/api/v1".to_string(),
            gateway_api_key: "test-key".to_string(),
            gateway_model: "google/gemini-2.5-flash".to_string(),
            gateway_max_tokens: GATEWAY_MAX_TOKENS,
            storage_backend: "local".to_string(),
            local_storage_path: Some("/tmp/piast".to_string()),
            remote_file_base_url: None,
            remote_file_token: None,
            max_image_bytes: MAX_IMAGE_SIZE_MB * 1024 * 1024,
            ocr_soft_timeout_secs: OCR_SOFT_TIMEOUT_SECS,
            attempt_hard_timeout_secs: ATTEMPT_HARD_TIMEOUT_SECS,
            retry_base_delay_secs: DEFAULT_BASE_DELAY_SECS,
            retry_max_delay_secs: DEFAULT_MAX_DELAY_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            modern_confidence_threshold: MODERN_CONFIDENCE_THRESHOLD,
            historical_confidence_threshold: HISTORICAL_CONFIDENCE_THRESHOLD,
            case_rate_limit: CASE_RATE_LIMIT,
            rate_limit_window_secs: RATE_LIMIT_WINDOW_SECS,
            worker_batch_size: WORKER_BATCH_SIZE,
            worker_poll_interval_ms: WORKER_POLL_INTERVAL_MS,
            worker_max_concurrent: WORKER_MAX_CONCURRENT,
            stuck_after_secs: STUCK_AFTER_SECS,
            stuck_scan_interval_secs: STUCK_SCAN_INTERVAL_SECS,
            log_retention_days: LOG_RETENTION_DAYS,
            max_memory_usage_percent: MAX_MEMORY_USAGE_PERCENT,
            email_alerts_enabled: false,
            smtp_host: None,
            smtp_port: None,
            smtp_user: None,
            smtp_password: None,
            smtp_from: None,
            smtp_tls: true,
            alert_recipients: vec![],
        }
    }

    #[test]
    fn test_default_config_validates() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = base_config();
        config.modern_confidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_local_backend_requires_path() {
        let mut config = base_config();
        config.local_storage_path = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_http_backend_requires_base_url() {
        let mut config = base_config();
        config.storage_backend = "http".to_string();
        assert!(config.validate().is_err());
        config.remote_file_base_url = Some("https://files.example.com".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_soft_timeout_must_be_below_hard() {
        let mut config = base_config();
        config.ocr_soft_timeout_secs = config.attempt_hard_timeout_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_email_alerts_need_smtp_host() {
        let mut config = base_config();
        config.email_alerts_enabled = true;
        assert!(config.validate().is_err());
        config.smtp_host = Some("smtp.example.com".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_is_production() {
        let mut config = base_config();
        assert!(!config.is_production());
        config.environment = "Production".to_string();
        assert!(config.is_production());
    }
}
