use async_trait::async_trait;
use std::sync::Arc;

use piast_core::models::ParsedExtraction;

use crate::error::OcrError;
use crate::gateway::GatewayClient;
use crate::invoker::{parse_extraction, OcrInvoker};

const SYSTEM_PROMPT: &str = "You are an expert paleographer and OCR system for historical \
records from partitioned Poland: Russian-partition registries in Cyrillic script, \
Prussian-partition records in Gothic (Fraktur/Kurrent) script, and Austrian-partition \
records in Latin script. You transcribe the original script faithfully, transliterate \
names, and note the language and era. You always answer with a single JSON object and \
nothing else.";

const USER_PROMPT: &str = r#"Transcribe this archival record. Dates in these records are often written out in words or use the Julian calendar; keep them as text rather than forcing a date format. Respond with exactly this JSON structure:
{
  "document_kind": "birth_certificate" | "marriage_certificate" | "death_certificate" | "military_record" | "naturalization_record" | "unknown",
  "confidence": <your overall confidence in the extraction, 0.0 to 1.0>,
  "transcription": "<full transcription in the original script>",
  "warnings": ["<non-fatal issues: faded ink, damaged pages, uncertain readings>"],
  "fields": {
    "record_class": "historical_record",
    "original_script_name": "<subject's name in the original script, or null>",
    "transliterated_name": "<Latin transliteration, or null>",
    "event_date_text": "<the date exactly as written, or null>",
    "event_place": "<place, modern spelling when identifiable, or null>",
    "language": "<russian | german | latin | polish | ..., or null>",
    "era": "<e.g. 'russian_partition', 'prussian_partition', 'austrian_partition', or null>"
  },
  "translated_fields": <English translation of the record's key content as an object, or null>
}
Do not guess readings you are not sure of; use null and add a warning instead."#;

/// Invoker for historical/archival registry records (Cyrillic and Gothic
/// scripts). Pairs with the lower historical confidence threshold.
pub struct ArchivalRecordInvoker {
    gateway: Arc<GatewayClient>,
}

impl ArchivalRecordInvoker {
    pub fn new(gateway: Arc<GatewayClient>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl OcrInvoker for ArchivalRecordInvoker {
    fn name(&self) -> &'static str {
        "archival_record"
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
