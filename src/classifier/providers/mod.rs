// src/classifier/providers/mod.rs
// Classification provider abstraction and response parsing

mod claude;
mod ollama;
mod openai;
mod openrouter;

pub use claude::ClaudeProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use openrouter::OpenRouterProvider;

use crate::error::{MemoryError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Response from a classification provider
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub classified_type: String,
    pub confidence: f64,
    pub reasoning: String,
    pub tags: Vec<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub model_name: String,
}

/// Interface every classification provider implements.
#[async_trait]
pub trait ClassifierProvider: Send + Sync {
    /// Provider name for logging, metrics, and circuit state
    fn name(&self) -> &'static str;

    /// Whether the provider can accept requests right now
    async fn is_available(&self) -> bool;

    /// Classify content for a target collection.
    async fn classify(
        &self,
        content: &str,
        collection: &str,
        current_type: &str,
    ) -> Result<ProviderResponse>;
}

static FENCED_JSON: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").ok());

static TYPED_JSON: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"(?s)\{[^{}]*"classified_type"[^{}]*\}"#).ok());

static ANY_JSON: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").ok());

/// Parse an LLM response into the classification fields.
///
/// Handles clean JSON, JSON fenced by triple backticks, and JSON buried in
/// surrounding prose. Validates `classified_type` and `confidence`,
/// coerces confidence to a float, and normalizes `tags` to a list.
pub fn parse_classification_response(response_text: &str) -> Result<serde_json::Value> {
    let text = response_text.trim();

    // Fastest path: the whole response is the object
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        if let Ok(validated) = validate_fields(value) {
            return Ok(validated);
        }
    }

    for extractor in [&FENCED_JSON, &TYPED_JSON, &ANY_JSON] {
        let Some(re) = extractor.as_ref() else {
            continue;
        };
        if let Some(caps) = re.captures(text) {
            let candidate = caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str());
            if let Some(candidate) = candidate {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
                    if let Ok(validated) = validate_fields(value) {
                        return Ok(validated);
                    }
                }
            }
        }
    }

    let preview: String = text.chars().take(200).collect();
    warn!(response_preview = %preview, "classification response parse failed");
    Err(MemoryError::Provider(format!(
        "could not parse JSON from response: {}",
        text.chars().take(100).collect::<String>()
    )))
}

fn validate_fields(mut value: serde_json::Value) -> Result<serde_json::Value> {
    let obj = value
        .as_object_mut()
        .ok_or_else(|| MemoryError::Provider("response is not a JSON object".into()))?;

    if !obj.contains_key("classified_type") {
        return Err(MemoryError::Provider("missing 'classified_type'".into()));
    }

    // Coerce confidence to a float; strings like "0.8" are accepted
    let confidence = match obj.get("confidence") {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| MemoryError::Provider("missing or invalid 'confidence'".into()))?;
    obj.insert(
        "confidence".to_string(),
        serde_json::Value::from(confidence),
    );

    // Normalize tags to a list
    match obj.get("tags") {
        Some(serde_json::Value::Array(_)) => {}
        Some(other) => {
            let single = other.clone();
            obj.insert("tags".to_string(), serde_json::Value::Array(vec![single]));
        }
        None => {
            obj.insert("tags".to_string(), serde_json::Value::Array(Vec::new()));
        }
    }

    if !obj.contains_key("reasoning") {
        obj.insert("reasoning".to_string(), serde_json::Value::from(""));
    }

    Ok(value)
}

/// Convert a parsed classification object into a ProviderResponse.
pub(crate) fn response_from_value(
    value: &serde_json::Value,
    input_tokens: u32,
    output_tokens: u32,
    model_name: &str,
) -> ProviderResponse {
    ProviderResponse {
        classified_type: value["classified_type"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        confidence: value["confidence"].as_f64().unwrap_or(0.0),
        reasoning: value["reasoning"].as_str().unwrap_or_default().to_string(),
        tags: value["tags"]
            .as_array()
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        input_tokens,
        output_tokens,
        model_name: model_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_json() {
        let value = parse_classification_response(
            r#"{"classified_type": "rule", "confidence": 0.9, "reasoning": "strong language", "tags": ["style"]}"#,
        )
        .unwrap();
        assert_eq!(value["classified_type"], "rule");
        assert_eq!(value["confidence"], 0.9);
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "Here is the result:\n```json\n{\"classified_type\": \"decision\", \"confidence\": 0.8}\n```\nDone.";
        let value = parse_classification_response(text).unwrap();
        assert_eq!(value["classified_type"], "decision");
        assert_eq!(value["tags"], serde_json::json!([]));
    }

    #[test]
    fn test_parse_json_with_surrounding_text() {
        let text = r#"Sure! {"classified_type": "guideline", "confidence": "0.75"} hope that helps"#;
        let value = parse_classification_response(text).unwrap();
        assert_eq!(value["classified_type"], "guideline");
        assert_eq!(value["confidence"], 0.75);
    }

    #[test]
    fn test_parse_coerces_scalar_tags() {
        let value = parse_classification_response(
            r#"{"classified_type": "rule", "confidence": 0.9, "tags": "style"}"#,
        )
        .unwrap();
        assert_eq!(value["tags"], serde_json::json!(["style"]));
    }

    #[test]
    fn test_parse_rejects_missing_type() {
        assert!(parse_classification_response(r#"{"confidence": 0.9}"#).is_err());
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_classification_response("I think this is a rule.").is_err());
    }

    #[test]
    fn test_response_from_value() {
        let value = parse_classification_response(
            r#"{"classified_type": "rule", "confidence": 0.9, "reasoning": "r", "tags": ["a", "b"]}"#,
        )
        .unwrap();
        let response = response_from_value(&value, 100, 20, "test-model");
        assert_eq!(response.classified_type, "rule");
        assert_eq!(response.tags, vec!["a", "b"]);
        assert_eq!(response.input_tokens, 100);
        assert_eq!(response.model_name, "test-model");
    }
}
