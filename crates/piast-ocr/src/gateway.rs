use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::OcrError;

/// Shared client for the OpenAI-compatible AI gateway.
///
/// Failure classification happens here, from the HTTP status alone: 429 is
/// rate limiting, 402 is exhausted credits, 5xx and transport errors are
/// transient, any other non-success is a rejection.
#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    max_input_bytes: u64,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl GatewayClient {
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        max_tokens: u32,
        max_input_bytes: u64,
        request_timeout: Duration,
    ) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| OcrError::Transient(format!("Failed to build gateway client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            max_tokens,
            max_input_bytes,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one image plus prompts, return the model's raw text reply.
    pub async fn transcribe(
        &self,
        image_data: &[u8],
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, OcrError> {
        // Declared file sizes are checked before dispatch; this guards the
        // actual bytes fetched from storage.
        if image_data.len() as u64 > self.max_input_bytes {
            return Err(OcrError::OversizedInput {
                size: image_data.len() as u64,
                limit: self.max_input_bytes,
            });
        }

        use base64::Engine;
        let base64_image = base64::engine::general_purpose::STANDARD.encode(image_data);
        let media_type = detect_media_type(image_data);
        let data_url = format!("data:{};base64,{}", media_type, base64_image);

        let body = ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: serde_json::Value::String(system_prompt.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: serde_json::json!([
                        { "type": "text", "text": user_prompt },
                        { "type": "image_url", "image_url": { "url": data_url } }
                    ]),
                },
            ],
        };

        tracing::debug!(
            model = %self.model,
            media_type,
            image_bytes = image_data.len(),
            "Sending OCR request to gateway"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OcrError::Transient("Gateway request timed out".to_string())
                } else {
                    OcrError::Transient(format!("Gateway request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => OcrError::RateLimited,
                StatusCode::PAYMENT_REQUIRED => OcrError::CreditsExhausted,
                s if s.is_server_error() => {
                    OcrError::Transient(format!("Gateway returned {}", s))
                }
                s => OcrError::Rejected(format!("Gateway returned {}: {}", s, body_text)),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| OcrError::MalformedResponse(format!("Invalid gateway envelope: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OcrError::MalformedResponse("Gateway reply had no content".to_string()))
    }
}

/// Detect media type from image data using magic numbers. The declared
/// content type is checked earlier; this is what the model actually receives.
pub fn detect_media_type(data: &[u8]) -> &'static str {
    if data.len() < 4 {
        return "image/jpeg";
    }

    // JPEG: FF D8 FF
    if data[0] == 0xFF && data[1] == 0xD8 && data[2] == 0xFF {
        return "image/jpeg";
    }

    // PNG: 89 50 4E 47
    if data[0] == 0x89 && data[1] == 0x50 && data[2] == 0x4E && data[3] == 0x47 {
        return "image/png";
    }

    // GIF: 47 49 46
    if data[0] == 0x47 && data[1] == 0x49 && data[2] == 0x46 {
        return "image/gif";
    }

    // WebP: RIFF ... WEBP
    if data.len() >= 12
        && data[0] == 0x52
        && data[1] == 0x49
        && data[2] == 0x46
        && data[3] == 0x46
        && data[8] == 0x57
        && data[9] == 0x45
        && data[10] == 0x42
        && data[11] == 0x50
    {
        return "image/webp";
    }

    "image/jpeg"
}
