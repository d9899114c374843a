// src/classifier/providers/ollama.rs
// Ollama provider - free, local classification

use super::{parse_classification_response, response_from_value, ClassifierProvider, ProviderResponse};
use crate::classifier::prompts::build_classification_prompt;
use crate::config::ClassifierConfig;
use crate::error::{MemoryError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub struct OllamaProvider {
    base_url: String,
    model: String,
    max_input_chars: usize,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &ClassifierConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            base_url: config.ollama_base_url.trim_end_matches('/').to_string(),
            model: config.ollama_model.clone(),
            max_input_chars: config.max_input_chars,
            max_output_tokens: config.max_output_tokens,
            client,
        }
    }
}

#[async_trait]
impl ClassifierProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "ollama unavailable");
                false
            }
        }
    }

    async fn classify(
        &self,
        content: &str,
        collection: &str,
        current_type: &str,
    ) -> Result<ProviderResponse> {
        let prompt = build_classification_prompt(
            content,
            collection,
            current_type,
            None,
            self.max_input_chars,
        );

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "options": {
                    "num_predict": self.max_output_tokens,
                    "temperature": 0.1,
                },
            }))
            .send()
            .await
            .map_err(|e| MemoryError::Provider(format!("ollama request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(MemoryError::Provider(format!(
                "ollama returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MemoryError::Provider(format!("invalid ollama response: {e}")))?;

        let response_text = body["response"].as_str().unwrap_or_default();
        let classification = parse_classification_response(response_text)?;

        let input_tokens = body["prompt_eval_count"].as_u64().unwrap_or(0) as u32;
        let output_tokens = body["eval_count"].as_u64().unwrap_or(0) as u32;

        Ok(response_from_value(
            &classification,
            input_tokens,
            output_tokens,
            &self.model,
        ))
    }
}
