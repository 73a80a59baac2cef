use async_trait::async_trait;
use std::sync::Arc;

use piast_core::models::{Document, DocumentCategory, ParsedExtraction};

use crate::archival::ArchivalRecordInvoker;
use crate::error::OcrError;
use crate::gateway::GatewayClient;
use crate::json::extract_json_block;
use crate::modern::ModernRecordInvoker;
use crate::passport::PassportInvoker;

/// One OCR strategy: a prompt pairing and a validation pass for a class of
/// documents.
#[async_trait]
pub trait OcrInvoker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, image_data: &[u8]) -> Result<ParsedExtraction, OcrError>;
}

/// Parse a model reply into a validated extraction. Shared by all invokers;
/// anything that fails schema validation is a malformed response, retryable
/// like any other transient model misbehavior.
pub(crate) fn parse_extraction(text: &str) -> Result<ParsedExtraction, OcrError> {
    let extraction: ParsedExtraction = serde_json::from_str(extract_json_block(text))
        .map_err(|e| OcrError::MalformedResponse(format!("Extraction did not parse: {}", e)))?;
    extraction
        .validate()
        .map_err(OcrError::MalformedResponse)?;
    Ok(extraction)
}

/// The three invokers, with selection by declared category and archival flag.
#[derive(Clone)]
pub struct InvokerSet {
    modern: Arc<ModernRecordInvoker>,
    archival: Arc<ArchivalRecordInvoker>,
    passport: Arc<PassportInvoker>,
}

impl InvokerSet {
    pub fn new(gateway: Arc<GatewayClient>) -> Self {
        Self {
            modern: Arc::new(ModernRecordInvoker::new(gateway.clone())),
            archival: Arc::new(ArchivalRecordInvoker::new(gateway.clone())),
            passport: Arc::new(PassportInvoker::new(gateway)),
        }
    }

    /// Passports get the passport invoker regardless of the archival flag;
    /// everything else splits on whether the upload was marked archival.
    pub fn select(&self, document: &Document) -> Arc<dyn OcrInvoker> {
        if document.category == DocumentCategory::Passport {
            self.passport.clone()
        } else if document.is_archival() {
            self.archival.clone()
        } else {
            self.modern.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extraction_valid() {
        let text = r#"
        {
            "document_kind": "birth_certificate",
            "confidence": 0.92,
            "transcription": "Akt urodzenia nr 44/1928",
            "warnings": [],
            "fields": {
                "record_class": "civil_record",
                "person_name": "Stanisław Nowak",
                "event_date": "1928-05-02",
                "event_place": "Lwów",
                "father_name": null,
                "mother_name": null,
                "registry_office": null,
                "record_number": "44/1928"
            },
            "translated_fields": null
        }
        "#;
        let extraction = parse_extraction(text).unwrap();
        assert_eq!(extraction.confidence, 0.92);
    }

    #[test]
    fn test_parse_extraction_fenced() {
        let text = "```json\n{\"document_kind\": \"unknown\", \"confidence\": 0.4, \
                    \"transcription\": null, \"warnings\": [\"illegible\"], \
                    \"fields\": {\"record_class\": \"historical_record\", \
                    \"original_script_name\": null, \"transliterated_name\": null, \
                    \"event_date_text\": null, \"event_place\": null, \
                    \"language\": null, \"era\": null}, \"translated_fields\": null}\n```";
        let extraction = parse_extraction(text).unwrap();
        assert_eq!(extraction.warnings, vec!["illegible".to_string()]);
    }

    #[test]
    fn test_parse_extraction_confidence_out_of_range() {
        let text = r#"
        {
            "document_kind": "unknown",
            "confidence": 3.0,
            "transcription": null,
            "warnings": [],
            "fields": {
                "record_class": "civil_record",
                "person_name": null, "event_date": null, "event_place": null,
                "father_name": null, "mother_name": null,
                "registry_office": null, "record_number": null
            },
            "translated_fields": null
        }
        "#;
        assert!(matches!(
            parse_extraction(text),
            Err(OcrError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_extraction_prose_rejected() {
        assert!(matches!(
            parse_extraction("The document appears to be a birth certificate."),
            Err(OcrError::MalformedResponse(_))
        ));
    }
}
