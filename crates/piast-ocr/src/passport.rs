use async_trait::async_trait;
use std::sync::Arc;

use piast_core::models::ParsedExtraction;

use crate::error::OcrError;
use crate::gateway::GatewayClient;
use crate::invoker::{parse_extraction, OcrInvoker};

const SYSTEM_PROMPT: &str = "You are an expert OCR system for passports and travel documents. \
You read both the visual inspection zone and the machine-readable zone (MRZ), preferring \
the MRZ when the two disagree. You always answer with a single JSON object and nothing else.";

const USER_PROMPT: &str = r#"Extract this passport's data. Respond with exactly this JSON structure:
{
  "document_kind": "passport",
  "confidence": <your overall confidence in the extraction, 0.0 to 1.0>,
  "transcription": "<visible text including the MRZ lines>",
  "warnings": ["<non-fatal issues: glare, partially covered fields>"],
  "fields": {
    "record_class": "passport",
    "surname": "<or null>",
    "given_names": "<or null>",
    "passport_number": "<or null>",
    "nationality": "<ISO 3166-1 alpha-2 when determinable, or null>",
    "birth_date": "<YYYY-MM-DD or null>",
    "expiry_date": "<YYYY-MM-DD or null>",
    "issuing_authority": "<or null>"
  },
  "translated_fields": null
}
Dates must come from the MRZ when it is readable. Do not guess values you cannot read; use null and add a warning instead."#;

/// Invoker for passport scans.
pub struct PassportInvoker {
    gateway: Arc<GatewayClient>,
}

impl PassportInvoker {
    pub fn new(gateway: Arc<GatewayClient>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl OcrInvoker for PassportInvoker {
    fn name(&self) -> &'static str {
        "passport"
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
            "Extraction parsed"
        );

        Ok(extraction)
    }
}
