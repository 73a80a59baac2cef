//! Pre-dispatch validation rules.
//!
//! These checks run before any network call so an input that cannot possibly
//! succeed never burns an OCR invocation.

use crate::error::ProcessError;
use crate::models::{Document, DocumentCategory, PersonRole};

/// Content types the OCR gateway accepts as inline images.
pub const SUPPORTED_CONTENT_TYPES: &[&str] =
    &["image/jpeg", "image/png", "image/webp", "image/gif"];

pub fn is_supported_content_type(content_type: &str) -> bool {
    SUPPORTED_CONTENT_TYPES.contains(&content_type.to_lowercase().as_str())
}

/// Whether the declared category makes sense for the person's role in the
/// family tree. These mismatches are intake mistakes we reject before OCR.
pub fn category_valid_for_role(category: DocumentCategory, role: PersonRole) -> bool {
    match category {
        // A current passport only exists for living parties to the application.
        DocumentCategory::Passport => {
            matches!(role, PersonRole::Applicant | PersonRole::Spouse)
        }
        // A death certificate for the applicant or spouse is an intake error.
        DocumentCategory::DeathCertificate => {
            !matches!(role, PersonRole::Applicant | PersonRole::Spouse)
        }
        _ => true,
    }
}

/// Validates a document before dispatching it to an invoker. Failures are
/// terminal validation errors; nothing here is retryable.
pub fn validate_before_dispatch(
    document: &Document,
    max_image_bytes: u64,
) -> Result<(), ProcessError> {
    if !is_supported_content_type(&document.content_type) {
        return Err(ProcessError::UnsupportedContentType(
            document.content_type.clone(),
        ));
    }
    let size = document.file_size.max(0) as u64;
    if size > max_image_bytes {
        return Err(ProcessError::FileTooLarge {
            size,
            limit: max_image_bytes,
        });
    }
    if !category_valid_for_role(document.category, document.person_role) {
        return Err(ProcessError::CategoryRoleMismatch {
            category: document.category.to_string(),
            role: document.person_role.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OcrStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn document(category: DocumentCategory, role: PersonRole) -> Document {
        Document {
            id: Uuid::new_v4(),
            case_id: Uuid::new_v4(),
            person_id: None,
            name: "scan.jpg".to_string(),
            storage_path: "cases/x/scan.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            file_size: 100_000,
            category,
            person_role: role,
            metadata: serde_json::json!({}),
            ocr_status: OcrStatus::Pending,
            ocr_confidence: None,
            ocr_text: None,
            ocr_data: None,
            ocr_retry_count: 0,
            ocr_next_retry_at: None,
            ocr_error_message: None,
            ocr_reviewed_by: None,
            ocr_reviewed_at: None,
            is_verified_by_hac: false,
            data_applied_to_forms: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_supported_content_types() {
        assert!(is_supported_content_type("image/jpeg"));
        assert!(is_supported_content_type("IMAGE/PNG"));
        assert!(!is_supported_content_type("application/pdf"));
        assert!(!is_supported_content_type("text/plain"));
    }

    #[test]
    fn test_valid_document_passes() {
        let doc = document(DocumentCategory::BirthCertificate, PersonRole::Grandparent);
        assert!(validate_before_dispatch(&doc, 10 * 1024 * 1024).is_ok());
    }

    #[test]
    fn test_unsupported_content_type_rejected() {
        let mut doc = document(DocumentCategory::BirthCertificate, PersonRole::Parent);
        doc.content_type = "application/pdf".to_string();
        let err = validate_before_dispatch(&doc, 10 * 1024 * 1024).unwrap_err();
        assert_eq!(err.reason_code(), "unsupported_content_type");
    }

    #[test]
    fn test_oversized_file_rejected() {
        let mut doc = document(DocumentCategory::BirthCertificate, PersonRole::Parent);
        doc.file_size = 11 * 1024 * 1024;
        let err = validate_before_dispatch(&doc, 10 * 1024 * 1024).unwrap_err();
        assert_eq!(err.reason_code(), "file_too_large");
    }

    #[test]
    fn test_size_exactly_at_limit_accepted() {
        let mut doc = document(DocumentCategory::BirthCertificate, PersonRole::Parent);
        doc.file_size = 10 * 1024 * 1024;
        assert!(validate_before_dispatch(&doc, 10 * 1024 * 1024).is_ok());
    }

    #[test]
    fn test_passport_only_for_living_parties() {
        assert!(category_valid_for_role(
            DocumentCategory::Passport,
            PersonRole::Applicant
        ));
        assert!(category_valid_for_role(
            DocumentCategory::Passport,
            PersonRole::Spouse
        ));
        assert!(!category_valid_for_role(
            DocumentCategory::Passport,
            PersonRole::Grandparent
        ));
    }

    #[test]
    fn test_death_certificate_not_for_applicant() {
        assert!(!category_valid_for_role(
            DocumentCategory::DeathCertificate,
            PersonRole::Applicant
        ));
        assert!(category_valid_for_role(
            DocumentCategory::DeathCertificate,
            PersonRole::GreatGrandparent
        ));
    }

    #[test]
    fn test_role_mismatch_rejected_before_dispatch() {
        let doc = document(DocumentCategory::Passport, PersonRole::Grandparent);
        let err = validate_before_dispatch(&doc, 10 * 1024 * 1024).unwrap_err();
        assert_eq!(err.reason_code(), "category_role_mismatch");
    }
}
