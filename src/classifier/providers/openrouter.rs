// src/classifier/providers/openrouter.rs
// OpenRouter provider - cheap cloud fallback via the OpenAI-compatible API

use super::{parse_classification_response, response_from_value, ClassifierProvider, ProviderResponse};
use crate::classifier::prompts::build_classification_prompt;
use crate::config::ClassifierConfig;
use crate::error::{MemoryError, Result};
use async_trait::async_trait;
use std::time::Duration;

pub struct OpenRouterProvider {
    api_key: Option<String>,
    base_url: String,
    model: String,
    max_input_chars: usize,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl OpenRouterProvider {
    pub fn new(config: &ClassifierConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            api_key: std::env::var("OPENROUTER_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            base_url: config.openrouter_base_url.trim_end_matches('/').to_string(),
            model: config.openrouter_model.clone(),
            max_input_chars: config.max_input_chars,
            max_output_tokens: config.max_output_tokens,
            client,
        }
    }
}

#[async_trait]
impl ClassifierProvider for OpenRouterProvider {
    fn name(&self) -> &'static str {
        "openrouter"
    }

    async fn is_available(&self) -> bool {
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
            .ok_or_else(|| MemoryError::Provider("OPENROUTER_API_KEY not set".into()))?;

        let prompt = build_classification_prompt(
            content,
            collection,
            current_type,
            None,
            self.max_input_chars,
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "max_tokens": self.max_output_tokens,
                "temperature": 0.1,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await
            .map_err(|e| MemoryError::Provider(format!("openrouter request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(MemoryError::Provider(format!(
                "openrouter returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MemoryError::Provider(format!("invalid openrouter response: {e}")))?;

        let response_text = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default();
        let classification = parse_classification_response(response_text)?;

        let input_tokens = body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let output_tokens = body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32;

        Ok(response_from_value(
            &classification,
            input_tokens,
            output_tokens,
            &self.model,
        ))
    }
}
