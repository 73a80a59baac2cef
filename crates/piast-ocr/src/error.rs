use piast_core::ProcessError;
use thiserror::Error;

/// Errors from the OCR gateway and invokers, classified at the HTTP boundary
/// so the pipeline never has to inspect message text.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("input image of {size} bytes exceeds the {limit} byte limit")]
    OversizedInput { size: u64, limit: u64 },

    /// Upstream 429. Retryable.
    #[error("gateway rate limited the request")]
    RateLimited,

    /// Upstream 402. Terminal until someone tops up the account.
    #[error("gateway credits exhausted")]
    CreditsExhausted,

    /// Timeouts, connection failures, 5xx.
    #[error("transient gateway failure: {0}")]
    Transient(String),

    /// The model answered but not with JSON matching the extraction schema.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    /// Any other 4xx: the request itself was refused.
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
}

impl From<OcrError> for ProcessError {
    fn from(err: OcrError) -> Self {
        match err {
            OcrError::OversizedInput { size, limit } => {
                ProcessError::FileTooLarge { size, limit }
            }
            OcrError::RateLimited => ProcessError::UpstreamRateLimited,
            OcrError::CreditsExhausted => ProcessError::CreditsExhausted,
            OcrError::Transient(msg) => ProcessError::Transient(msg),
            OcrError::MalformedResponse(msg) => ProcessError::MalformedResponse(msg),
            // An outright rejection is neither caller error nor clearly
            // transient; it fails toward human review.
            OcrError::Rejected(msg) => ProcessError::Unknown(anyhow::anyhow!(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use piast_core::ErrorClass;

    #[test]
    fn test_classification_survives_conversion() {
        let err: ProcessError = OcrError::RateLimited.into();
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.is_retryable());

        let err: ProcessError = OcrError::CreditsExhausted.into();
        assert_eq!(err.class(), ErrorClass::Persistent);

        let err: ProcessError = OcrError::Rejected("schema refused".to_string()).into();
        assert_eq!(err.class(), ErrorClass::Unknown);

        let err: ProcessError = OcrError::OversizedInput {
            size: 20,
            limit: 10,
        }
        .into();
        assert_eq!(err.class(), ErrorClass::Validation);
    }
}
