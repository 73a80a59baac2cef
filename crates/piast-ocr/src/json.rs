//! Recovery of JSON payloads from model output.
//!
//! Models regularly wrap their JSON in markdown code fences or preface it
//! with prose; strip that before handing the text to serde.

/// Extract the JSON body from a model response, unwrapping markdown code
/// fences when present.
pub fn extract_json_block(text: &str) -> &str {
    if text.contains("```json") {
        text.split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(text)
            .trim()
    } else if text.contains("```") {
        text.split("```")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(text)
            .trim()
    } else {
        text.trim()
    }
}

/// Parse a model response into a JSON value, tolerating code fences.
pub fn parse_model_json(text: &str) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::from_str(extract_json_block(text))
}
