//! Error taxonomy for the processing pipeline.
//!
//! Every failure is classified at the point where it occurs (HTTP status code,
//! storage error variant, validation rule) rather than inferred later from
//! message text. The orchestrator decides retry vs terminal vs alert from
//! [`ErrorClass`] and never lets an invoker error escape unclassified.

use chrono::NaiveDate;
use uuid::Uuid;

/// Coarse classification driving the orchestrator's failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller error. Never retried; terminal with a specific reason code.
    Validation,
    /// Environment error. Retried up to the configured budget.
    Transient,
    /// Non-retryable infrastructure failure. Terminal and raises an audit alert.
    Persistent,
    /// Unclassified. Fails toward human review, never toward silent acceptance.
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("unsupported content type for OCR: {0}")]
    UnsupportedContentType(String),

    #[error("file too large: {size} bytes exceeds limit of {limit}")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("category {category} is not valid for person role {role}")]
    CategoryRoleMismatch { category: String, role: String },

    #[error("extracted kind {extracted} does not match declared category {declared}")]
    DocumentKindMismatch { declared: String, extracted: String },

    #[error("passport expired on {0}")]
    PassportExpired(NaiveDate),

    #[error("case {case_id} exceeded {limit} processing attempts in the trailing window")]
    CaseRateLimited { case_id: Uuid, limit: u32 },

    #[error("source file missing: {0}")]
    MissingRemoteFile(String),

    #[error("transient gateway error: {0}")]
    Transient(String),

    #[error("upstream rate limited")]
    UpstreamRateLimited,

    #[error("upstream credits exhausted")]
    CreditsExhausted,

    #[error("malformed gateway response: {0}")]
    MalformedResponse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("unexpected error: {0}")]
    Unknown(#[source] anyhow::Error),
}

impl ProcessError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProcessError::DocumentNotFound(_)
            | ProcessError::UnsupportedContentType(_)
            | ProcessError::FileTooLarge { .. }
            | ProcessError::CategoryRoleMismatch { .. }
            | ProcessError::DocumentKindMismatch { .. }
            | ProcessError::PassportExpired(_) => ErrorClass::Validation,

            // Rate-limit rejections are retryable later; the orchestrator
            // defers the document without touching the retry budget.
            ProcessError::CaseRateLimited { .. }
            | ProcessError::Transient(_)
            | ProcessError::UpstreamRateLimited
            | ProcessError::MalformedResponse(_)
            | ProcessError::Database(_) => ErrorClass::Transient,

            ProcessError::MissingRemoteFile(_)
            | ProcessError::CreditsExhausted
            | ProcessError::Storage(_) => ErrorClass::Persistent,

            ProcessError::Unknown(_) => ErrorClass::Unknown,
        }
    }

    /// Stable machine-readable code, safe for audit/alert payloads (no PII).
    pub fn reason_code(&self) -> &'static str {
        match self {
            ProcessError::DocumentNotFound(_) => "document_not_found",
            ProcessError::UnsupportedContentType(_) => "unsupported_content_type",
            ProcessError::FileTooLarge { .. } => "file_too_large",
            ProcessError::CategoryRoleMismatch { .. } => "category_role_mismatch",
            ProcessError::DocumentKindMismatch { .. } => "document_kind_mismatch",
            ProcessError::PassportExpired(_) => "passport_expired",
            ProcessError::CaseRateLimited { .. } => "rate_limited",
            ProcessError::Transient(_) => "transient_gateway_error",
            ProcessError::UpstreamRateLimited => "upstream_rate_limited",
            ProcessError::CreditsExhausted => "credits_exhausted",
            ProcessError::MalformedResponse(_) => "malformed_response",
            ProcessError::MissingRemoteFile(_) => "missing_remote_file",
            ProcessError::Storage(_) => "storage_error",
            ProcessError::Database(_) => "database_error",
            ProcessError::Unknown(_) => "unknown_error",
        }
    }

    /// Whether the automatic retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient && !matches!(self, ProcessError::CaseRateLimited { .. })
    }
}

impl From<serde_json::Error> for ProcessError {
    fn from(err: serde_json::Error) -> Self {
        ProcessError::MalformedResponse(err.to_string())
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for ProcessError {
    fn from(err: sqlx::Error) -> Self {
        ProcessError::Database(anyhow::Error::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_never_retried() {
        let errors = [
            ProcessError::UnsupportedContentType("text/plain".to_string()),
            ProcessError::FileTooLarge {
                size: 20_000_000,
                limit: 10_000_000,
            },
            ProcessError::PassportExpired(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
        ];
        for err in errors {
            assert_eq!(err.class(), ErrorClass::Validation);
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        let errors = [
            ProcessError::Transient("upstream 503".to_string()),
            ProcessError::UpstreamRateLimited,
            ProcessError::MalformedResponse("not json".to_string()),
        ];
        for err in errors {
            assert_eq!(err.class(), ErrorClass::Transient);
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn test_rate_limit_is_deferred_not_retried() {
        let err = ProcessError::CaseRateLimited {
            case_id: Uuid::nil(),
            limit: 10,
        };
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(!err.is_retryable());
        assert_eq!(err.reason_code(), "rate_limited");
    }

    #[test]
    fn test_persistent_errors_terminal() {
        let errors = [
            ProcessError::MissingRemoteFile("cases/x/missing.jpg".to_string()),
            ProcessError::CreditsExhausted,
            ProcessError::Storage("key resolves outside base path".to_string()),
        ];
        for err in errors {
            assert_eq!(err.class(), ErrorClass::Persistent);
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_unknown_class() {
        let err = ProcessError::Unknown(anyhow::anyhow!("something odd"));
        assert_eq!(err.class(), ErrorClass::Unknown);
        assert!(!err.is_retryable());
        assert_eq!(err.reason_code(), "unknown_error");
    }

    #[test]
    fn test_reason_codes_carry_no_free_text() {
        // Reason codes go to audit sinks; they must be static identifiers.
        let err = ProcessError::MissingRemoteFile("cases/42/passport-maria.jpg".to_string());
        assert_eq!(err.reason_code(), "missing_remote_file");
        assert!(!err.reason_code().contains("maria"));
    }
}
