//! Pure classification of a validated extraction into a pipeline outcome.
//!
//! No I/O here: the orchestrator feeds in the extraction, the document, the
//! thresholds, and today's date, and gets back a disposition it can apply.

use chrono::NaiveDate;

use piast_core::models::{Document, DocumentKind, ParsedExtraction};
use piast_core::ProcessError;

/// Per-class acceptance thresholds. An extraction meets a threshold at
/// equality.
#[derive(Debug, Clone, Copy)]
pub struct ConfidencePolicy {
    pub modern_threshold: f64,
    pub historical_threshold: f64,
}

impl ConfidencePolicy {
    pub fn threshold_for(&self, archival: bool) -> f64 {
        if archival {
            self.historical_threshold
        } else {
            self.modern_threshold
        }
    }
}

/// What should happen to a successfully parsed extraction.
#[derive(Debug)]
pub enum ExtractionDisposition {
    /// Meets the bar: store and mark completed.
    Accept,
    /// Stored, but a human looks before anyone uses it.
    NeedsReview { reason: &'static str },
    /// Terminal rejection; the document itself is unusable for the case.
    Reject(ProcessError),
}

/// Classify an extraction against the declared document and policy.
///
/// Order matters: hard rejections (wrong document kind, expired passport)
/// beat review routing, and warnings force review even above the confidence
/// threshold.
pub fn classify_outcome(
    extraction: &ParsedExtraction,
    document: &Document,
    policy: &ConfidencePolicy,
    today: NaiveDate,
) -> ExtractionDisposition {
    if let Some(expected) = DocumentKind::expected_for(document.category) {
        if extraction.document_kind != expected && extraction.document_kind != DocumentKind::Unknown
        {
            return ExtractionDisposition::Reject(ProcessError::DocumentKindMismatch {
                declared: document.category.to_string(),
                extracted: extraction.document_kind.to_string(),
            });
        }
    }

    if let Some(expiry) = extraction.passport_expiry() {
        if expiry < today {
            return ExtractionDisposition::Reject(ProcessError::PassportExpired(expiry));
        }
    }

    // The model saw the page but could not say what it is.
    if extraction.document_kind == DocumentKind::Unknown {
        return ExtractionDisposition::NeedsReview {
            reason: "unclassified_document",
        };
    }

    if !extraction.warnings.is_empty() {
        return ExtractionDisposition::NeedsReview {
            reason: "extraction_warnings",
        };
    }

    let threshold = policy.threshold_for(document.is_archival());
    if extraction.confidence < threshold {
        return ExtractionDisposition::NeedsReview {
            reason: "low_confidence",
        };
    }

    ExtractionDisposition::Accept
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use piast_core::models::{DocumentCategory, ExtractedFields, OcrStatus, PersonRole};
    use uuid::Uuid;

    const POLICY: ConfidencePolicy = ConfidencePolicy {
        modern_threshold: 0.85,
        historical_threshold: 0.75,
    };

    fn document(category: DocumentCategory, archival: bool) -> Document {
        Document {
            id: Uuid::new_v4(),
            case_id: Uuid::new_v4(),
            person_id: None,
            name: "scan.jpg".to_string(),
            storage_path: "cases/x/scan.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            file_size: 100_000,
            category,
            person_role: PersonRole::Grandparent,
            metadata: serde_json::json!({ "archival": archival }),
            ocr_status: OcrStatus::Processing,
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

    fn extraction(kind: DocumentKind, confidence: f64) -> ParsedExtraction {
        let fields = match kind {
            DocumentKind::Passport => ExtractedFields::Passport {
                surname: Some("Nowak".to_string()),
                given_names: None,
                passport_number: None,
                nationality: None,
                birth_date: None,
                expiry_date: NaiveDate::from_ymd_opt(2032, 1, 1),
                issuing_authority: None,
            },
            _ => ExtractedFields::CivilRecord {
                person_name: Some("Jan Nowak".to_string()),
                event_date: None,
                event_place: None,
                father_name: None,
                mother_name: None,
                registry_office: None,
                record_number: None,
            },
        };
        ParsedExtraction {
            document_kind: kind,
            confidence,
            transcription: None,
            warnings: vec![],
            fields,
            translated_fields: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 28).unwrap()
    }

    #[test]
    fn test_confident_match_accepted() {
        let doc = document(DocumentCategory::BirthCertificate, false);
        let ext = extraction(DocumentKind::BirthCertificate, 0.93);
        assert!(matches!(
            classify_outcome(&ext, &doc, &POLICY, today()),
            ExtractionDisposition::Accept
        ));
    }

    #[test]
    fn test_confidence_at_threshold_accepted() {
        let doc = document(DocumentCategory::BirthCertificate, false);
        let ext = extraction(DocumentKind::BirthCertificate, 0.85);
        assert!(matches!(
            classify_outcome(&ext, &doc, &POLICY, today()),
            ExtractionDisposition::Accept
        ));
    }

    #[test]
    fn test_just_below_threshold_needs_review() {
        let doc = document(DocumentCategory::BirthCertificate, false);
        let ext = extraction(DocumentKind::BirthCertificate, 0.8499);
        assert!(matches!(
            classify_outcome(&ext, &doc, &POLICY, today()),
            ExtractionDisposition::NeedsReview {
                reason: "low_confidence"
            }
        ));
    }

    #[test]
    fn test_archival_uses_lower_threshold() {
        let doc = document(DocumentCategory::BirthCertificate, true);
        let ext = extraction(DocumentKind::BirthCertificate, 0.78);
        assert!(matches!(
            classify_outcome(&ext, &doc, &POLICY, today()),
            ExtractionDisposition::Accept
        ));
        let doc_modern = document(DocumentCategory::BirthCertificate, false);
        assert!(matches!(
            classify_outcome(&ext, &doc_modern, &POLICY, today()),
            ExtractionDisposition::NeedsReview { .. }
        ));
    }

    #[test]
    fn test_warnings_force_review_above_threshold() {
        let doc = document(DocumentCategory::BirthCertificate, false);
        let mut ext = extraction(DocumentKind::BirthCertificate, 0.97);
        ext.warnings.push("left margin torn".to_string());
        assert!(matches!(
            classify_outcome(&ext, &doc, &POLICY, today()),
            ExtractionDisposition::NeedsReview {
                reason: "extraction_warnings"
            }
        ));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let doc = document(DocumentCategory::BirthCertificate, false);
        let ext = extraction(DocumentKind::MarriageCertificate, 0.95);
        assert!(matches!(
            classify_outcome(&ext, &doc, &POLICY, today()),
            ExtractionDisposition::Reject(ProcessError::DocumentKindMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_kind_goes_to_review_not_rejection() {
        let doc = document(DocumentCategory::BirthCertificate, false);
        let ext = extraction(DocumentKind::Unknown, 0.9);
        assert!(matches!(
            classify_outcome(&ext, &doc, &POLICY, today()),
            ExtractionDisposition::NeedsReview {
                reason: "unclassified_document"
            }
        ));
    }

    #[test]
    fn test_other_category_accepts_any_kind() {
        let doc = document(DocumentCategory::Other, false);
        let ext = extraction(DocumentKind::MilitaryRecord, 0.9);
        assert!(matches!(
            classify_outcome(&ext, &doc, &POLICY, today()),
            ExtractionDisposition::Accept
        ));
    }

    #[test]
    fn test_expired_passport_rejected() {
        let doc = document(DocumentCategory::Passport, false);
        let mut ext = extraction(DocumentKind::Passport, 0.95);
        if let ExtractedFields::Passport { expiry_date, .. } = &mut ext.fields {
            *expiry_date = NaiveDate::from_ymd_opt(2020, 6, 1);
        }
        assert!(matches!(
            classify_outcome(&ext, &doc, &POLICY, today()),
            ExtractionDisposition::Reject(ProcessError::PassportExpired(_))
        ));
    }

    #[test]
    fn test_passport_expiring_today_accepted() {
        let doc = document(DocumentCategory::Passport, false);
        let mut ext = extraction(DocumentKind::Passport, 0.95);
        if let ExtractedFields::Passport { expiry_date, .. } = &mut ext.fields {
            *expiry_date = Some(today());
        }
        assert!(matches!(
            classify_outcome(&ext, &doc, &POLICY, today()),
            ExtractionDisposition::Accept
        ));
    }
}
