// src/classifier/providers/claude.rs
// Anthropic messages API provider

use super::{parse_classification_response, response_from_value, ClassifierProvider, ProviderResponse};
use crate::classifier::prompts::build_classification_prompt;
use crate::config::ClassifierConfig;
use crate::error::{MemoryError, Result};
use async_trait::async_trait;
use std::time::Duration;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct ClaudeProvider {
    api_key: Option<String>,
    model: String,
    max_input_chars: usize,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl ClaudeProvider {
    pub fn new(config: &ClassifierConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            model: config.anthropic_model.clone(),
            max_input_chars: config.max_input_chars,
            max_output_tokens: config.max_output_tokens,
            client,
        }
    }
}

#[async_trait]
impl ClassifierProvider for ClaudeProvider {
    fn name(&self) -> &'static str {
        "claude"
    }

    async fn is_available(&self) -> bool {
        // A configured key is the availability signal; a probe request
        // would cost tokens.
        self.api_key.is_some()
    }

    async fn classify(
        &self,
        content: &str,
        collection: &str,
        current_type: &str,
    ) -> Result<ProviderResponse> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| MemoryError::Provider("ANTHROPIC_API_KEY not set".into()))?;

        let prompt = build_classification_prompt(
            content,
            collection,
            current_type,
            None,
            self.max_input_chars,
        );

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&serde_json::json!({
                "model": self.model,
                "max_tokens": self.max_output_tokens,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await
            .map_err(|e| MemoryError::Provider(format!("claude request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(MemoryError::Provider(format!(
                "claude returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MemoryError::Provider(format!("invalid claude response: {e}")))?;

        let response_text = body["content"]
            .as_array()
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b["type"] == "text")
                    .and_then(|b| b["text"].as_str())
            })
            .unwrap_or_default();
        let classification = parse_classification_response(response_text)?;

        let input_tokens = body["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
        let output_tokens = body["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;

        Ok(response_from_value(
            &classification,
            input_tokens,
            output_tokens,
            &self.model,
        ))
    }
}
