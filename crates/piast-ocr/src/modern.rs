use async_trait::async_trait;
use std::sync::Arc;

use piast_core::models::ParsedExtraction;

use crate::error::OcrError;
use crate::gateway::GatewayClient;
use crate::invoker::{parse_extraction, OcrInvoker};

const SYSTEM_PROMPT: &str = "You are an expert OCR system for Polish civil registry documents \
(birth, marriage and death certificates, military and naturalization records) issued by \
registry offices (Urząd Stanu Cywilnego). You transcribe documents faithfully and extract \
structured fields. You always answer with a single JSON object and nothing else.";

const USER_PROMPT: &str = r#"Transcribe this document and extract its fields. Respond with exactly this JSON structure:
{
  "document_kind": "birth_certificate" | "marriage_certificate" | "death_certificate" | "military_record" | "naturalization_record" | "unknown",
  "confidence": <your overall confidence in the extraction, 0.0 to 1.0>,
  "transcription": "<full transcription of the visible text>",
  "warnings": ["<non-fatal issues: illegible sections, damage, missing stamps>"],
  "fields": {
    "record_class": "civil_record",
    "person_name": "<full name of the record subject, or null>",
    "event_date": "<YYYY-MM-DD or null>",
    "event_place": "<place of the event, or null>",
    "father_name": "<or null>",
    "mother_name": "<maiden name included when shown, or null>",
    "registry_office": "<issuing office, or null>",
    "record_number": "<record/act number, or null>"
  },
  "translated_fields": <English translation of the fields as an object, or null>
}
Keep Polish diacritics exactly as written. Do not guess values you cannot read; use null and add a warning instead."#;

/// Invoker for modern (post-1945) civil registry documents.
pub struct ModernRecordInvoker {
    gateway: Arc<GatewayClient>,
}

impl ModernRecordInvoker {
    pub fn new(gateway: Arc<GatewayClient>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl OcrInvoker for ModernRecordInvoker {
    fn name(&self) -> &'static str {
        "modern_record"
    }

    async fn extract(&self, image_data: &[u8]) -> Result<ParsedExtraction, OcrError> {
        let reply = self
            .gateway
            .transcribe(image_data, SYSTEM_PROMPT, USER_PROMPT)
            .await?;
        let extraction = parse_extraction(&reply)?;

        tracing::debug!(
            invoker = self.name(),
            document_kind = %extraction.document_kind,
            confidence = extraction.confidence,
            warnings = extraction.warnings.len(),
            "Extraction parsed"
        );

        Ok(extraction)
    }
}
