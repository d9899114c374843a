// src/embeddings/mod.rs
// Batch embedding client for the local embedding service

use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Embedding dimension of the configured model
pub const EMBEDDING_DIM: usize = 768;

/// Connection establishment timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Pool idle timeout. Kept short to avoid stale keep-alive connections.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Keep-alive pool size
const POOL_MAX_IDLE: usize = 20;

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for the embedding service.
///
/// Long-lived reqwest client with connection pooling; reuse one instance
/// across requests. `embed` is all-or-nothing: it never returns a partial
/// batch.
pub struct EmbeddingClient {
    base_url: String,
    client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(config: &MemoryConfig) -> Self {
        let read_timeout = Duration::from_secs_f64(config.embedding_read_timeout);
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            // Total budget: read timeout plus a little headroom for the write
            .timeout(read_timeout + Duration::from_secs(5))
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE)
            .build()
            .unwrap_or_default();

        Self {
            base_url: config.embedding_url(),
            client,
        }
    }

    /// Client pointed at an explicit base URL (tests, health probes)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// Generate embeddings for a batch of texts.
    ///
    /// Returns one vector per input, each `EMBEDDING_DIM` long. An empty
    /// input returns an empty batch without a network round-trip. Read
    /// timeouts map to [`MemoryError::EmbeddingTimeout`]; every other
    /// transport or protocol failure maps to [`MemoryError::Embedding`].
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "texts": texts }))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, texts.len()))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(
                texts_count = texts.len(),
                status = %status,
                "embedding request rejected"
            );
            return Err(MemoryError::Embedding(format!(
                "embedding service returned {status}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::Embedding(format!("invalid embedding response: {e}")))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(MemoryError::Embedding(format!(
                "embedding count mismatch: sent {} texts, got {} vectors",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        if let Some(bad) = parsed.embeddings.iter().find(|v| v.len() != EMBEDDING_DIM) {
            return Err(MemoryError::Embedding(format!(
                "unexpected embedding dimension {} (want {})",
                bad.len(),
                EMBEDDING_DIM
            )));
        }

        debug!(texts_count = texts.len(), "embeddings generated");
        Ok(parsed.embeddings)
    }

    /// Embed a single text
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| MemoryError::Embedding("empty embedding response".to_string()))
    }

    /// Cheap health probe against the service's /health endpoint.
    /// Never raises; any failure reads as unhealthy.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(base_url = %self.base_url, error = %e, "embedding health check failed");
                false
            }
        }
    }

    fn map_transport_error(&self, e: reqwest::Error, texts_count: usize) -> MemoryError {
        if e.is_timeout() {
            warn!(
                texts_count,
                base_url = %self.base_url,
                "embedding request timed out"
            );
            MemoryError::EmbeddingTimeout
        } else {
            warn!(
                texts_count,
                base_url = %self.base_url,
                error = %e,
                "embedding request failed"
            );
            MemoryError::Embedding(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embed_empty_batch_is_local() {
        // Points at a port nothing listens on; the empty batch must still
        // succeed because no request is sent.
        let client = EmbeddingClient::with_base_url("http://127.0.0.1:1");
        let result = client.embed(&[]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_embed_unreachable_maps_to_embedding_error() {
        let client = EmbeddingClient::with_base_url("http://127.0.0.1:1");
        let err = client.embed(&["hello".to_string()]).await.unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Embedding(_) | MemoryError::EmbeddingTimeout
        ));
    }

    #[tokio::test]
    async fn test_health_check_never_raises() {
        let client = EmbeddingClient::with_base_url("http://127.0.0.1:1");
        assert!(!client.health_check().await);
    }
}
