// src/client/mod.rs
// Async wrapper around the upstream LLM messages API
//
// All calls pass through the rate-limit queue; conversation turns are
// captured in the background; 429/529 responses retry with exponential
// backoff and jitter, honoring retry-after.

mod capture;

pub use capture::ConversationCapture;

use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::limiter::RateLimitQueue;
use crate::storage::MemoryStorage;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest_eventsource::{Event, RequestBuilderExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Average tokens per English word, for pre-request estimation
const TOKENS_PER_WORD: f64 = 1.3;

/// Retries after the initial attempt
const MAX_RETRIES: u32 = 3;

/// Backoff cap in seconds
const MAX_BACKOFF_SECONDS: f64 = 8.0;

/// Upper bound of the additive random jitter in seconds
const JITTER_SECONDS: f64 = 0.4;

/// Close-time budget for outstanding capture tasks
const CLOSE_STORAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Token usage reported by the upstream API
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Result of a send_message call
#[derive(Debug, Clone)]
pub struct SendResult {
    pub content: String,
    pub session_id: String,
    pub turn_number: u64,
    pub usage: Usage,
}

/// Async LLM client with rate limiting, retry, and conversation capture.
pub struct AsyncLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: Arc<RateLimitQueue>,
    capture: ConversationCapture,
}

impl AsyncLlmClient {
    /// Build a client for a session. The API key comes from
    /// `ANTHROPIC_API_KEY`; the endpoint can be overridden with
    /// `ANTHROPIC_BASE_URL` (tests, proxies).
    pub fn new(
        config: &MemoryConfig,
        storage: Arc<MemoryStorage>,
        cwd: impl Into<String>,
        session_id: Option<String>,
    ) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| MemoryError::Config("ANTHROPIC_API_KEY not set".to_string()))?;
        let base_url = std::env::var("ANTHROPIC_BASE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        let capture = ConversationCapture::new(storage, cwd, session_id);
        let limiter = Arc::new(RateLimitQueue::new(&config.rate_limit));

        info!(
            session_id = %capture.session_id(),
            rpm_limit = config.rate_limit.requests_per_minute,
            tpm_limit = config.rate_limit.tokens_per_minute,
            "async llm client initialized"
        );

        Ok(Self {
            http,
            base_url,
            api_key,
            limiter,
            capture,
        })
    }

    /// Build a client against an explicit endpoint and key. Used by tests
    /// and proxy setups; `new` resolves both from the environment.
    pub fn with_endpoint(
        config: &MemoryConfig,
        storage: Arc<MemoryStorage>,
        cwd: impl Into<String>,
        session_id: Option<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            limiter: Arc::new(RateLimitQueue::new(&config.rate_limit)),
            capture: ConversationCapture::new(storage, cwd, session_id),
        }
    }

    pub fn session_id(&self) -> &str {
        self.capture.session_id()
    }

    pub fn rate_limiter(&self) -> &RateLimitQueue {
        &self.limiter
    }

    /// Send a prompt and return the complete response.
    ///
    /// The user message is captured before the upstream call; the agent
    /// response after it; neither capture blocks the conversation.
    pub async fn send_message(
        &self,
        prompt: &str,
        model: Option<&str>,
        max_tokens: u32,
    ) -> Result<SendResult> {
        let estimated_tokens = estimate_tokens(prompt);
        self.limiter.acquire(estimated_tokens).await?;

        let turn_number = self.capture.capture_user_message(prompt).await;

        let body = serde_json::json!({
            "model": model.unwrap_or(DEFAULT_MODEL),
            "max_tokens": max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });

        let start = Instant::now();
        let result = self.create_message_with_retry(&body).await;
        let api_duration = start.elapsed();

        let (message, headers) = match result {
            Ok(ok) => {
                self.limiter.record_success();
                ok
            }
            Err(e) => {
                self.limiter.record_failure();
                warn!(session_id = %self.session_id(), error = %e, "send_message failed");
                return Err(e);
            }
        };

        debug!(
            api_duration_seconds = api_duration.as_secs_f64(),
            "upstream call completed"
        );
        self.limiter.update_from_headers(&headers).await;

        let content = extract_text_content(&message);
        let usage = Usage {
            input_tokens: message["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: message["usage"]["output_tokens"].as_u64().unwrap_or(0),
        };

        self.capture.capture_agent_response(&content).await;

        Ok(SendResult {
            content,
            session_id: self.session_id().to_string(),
            turn_number,
            usage,
        })
    }

    /// Send a prompt over the streaming API, buffering every chunk, and
    /// return the full text as one piece.
    ///
    /// Retry applies to the whole stream: a mid-stream failure restarts
    /// from scratch. Buffering trades latency for reliability; resumable
    /// streams would need chunk-level replay.
    pub async fn send_message_buffered(
        &self,
        prompt: &str,
        model: Option<&str>,
        max_tokens: u32,
    ) -> Result<SendResult> {
        let estimated_tokens = estimate_tokens(prompt);
        self.limiter.acquire(estimated_tokens).await?;

        let turn_number = self.capture.capture_user_message(prompt).await;

        let body = serde_json::json!({
            "model": model.unwrap_or(DEFAULT_MODEL),
            "max_tokens": max_tokens,
            "stream": true,
            "messages": [{"role": "user", "content": prompt}],
        });

        let content = match self.stream_with_retry(&body).await {
            Ok(content) => {
                self.limiter.record_success();
                content
            }
            Err(e) => {
                self.limiter.record_failure();
                warn!(session_id = %self.session_id(), error = %e, "streaming failed");
                return Err(e);
            }
        };

        self.capture.capture_agent_response(&content).await;

        Ok(SendResult {
            content,
            session_id: self.session_id().to_string(),
            turn_number,
            usage: Usage::default(),
        })
    }

    /// Await outstanding captures (bounded), then drop the HTTP client.
    pub async fn close(self) -> usize {
        let stored = self.capture.wait_for_storage(CLOSE_STORAGE_TIMEOUT).await;
        info!(
            session_id = %self.capture.session_id(),
            stored,
            "async llm client closed"
        );
        stored
    }

    async fn create_message_with_retry(
        &self,
        body: &serde_json::Value,
    ) -> Result<(serde_json::Value, HeaderMap)> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let error = match self.create_message_once(body).await {
                Ok(ok) => return Ok(ok),
                Err(e) => e,
            };

            let retry_after = match retry_disposition(&error) {
                Some(retry_after) => retry_after,
                None => return Err(error),
            };
            if attempt > MAX_RETRIES {
                return Err(error);
            }

            let delay = retry_delay(attempt, retry_after);
            warn!(
                attempt,
                wait_seconds = delay,
                retry_after = ?retry_after,
                error = %error,
                "retrying upstream call"
            );
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }
    }

    async fn create_message_once(
        &self,
        body: &serde_json::Value,
    ) -> Result<(serde_json::Value, HeaderMap)> {
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();

        if !status.is_success() {
            let retry_after = headers
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok());
            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(MemoryError::UpstreamRateLimited { retry_after });
            }
            return Err(MemoryError::UpstreamStatus {
                status: status.as_u16(),
                message: text.chars().take(200).collect(),
            });
        }

        let message: serde_json::Value = response.json().await?;
        Ok((message, headers))
    }

    async fn stream_with_retry(&self, body: &serde_json::Value) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let error = match self.stream_once(body).await {
                Ok(content) => return Ok(content),
                Err(e) => e,
            };

            let retry_after = match retry_disposition(&error) {
                Some(retry_after) => retry_after,
                None => return Err(error),
            };
            if attempt > MAX_RETRIES {
                return Err(error);
            }

            let delay = retry_delay(attempt, retry_after);
            warn!(attempt, wait_seconds = delay, error = %error, "retrying stream from start");
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }
    }

    async fn stream_once(&self, body: &serde_json::Value) -> Result<String> {
        let request = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body);

        let mut stream = request
            .eventsource()
            .map_err(|e| MemoryError::Other(format!("stream setup failed: {e}")))?;

        let mut buffered = String::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    if message.event == "message_stop" {
                        break;
                    }
                    if message.event == "content_block_delta" {
                        if let Ok(data) = serde_json::from_str::<serde_json::Value>(&message.data) {
                            if let Some(text) = data["delta"]["text"].as_str() {
                                buffered.push_str(text);
                            }
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<f64>().ok());
                    if status.as_u16() == 429 {
                        return Err(MemoryError::UpstreamRateLimited { retry_after });
                    }
                    return Err(MemoryError::UpstreamStatus {
                        status: status.as_u16(),
                        message: "stream rejected".to_string(),
                    });
                }
                Err(e) => {
                    // Mid-stream failure: the whole operation restarts
                    return Err(MemoryError::Other(format!("stream error: {e}")));
                }
            }
        }

        Ok(buffered)
    }
}

/// Whether an error is retryable, and with what override delay.
/// `Some(None)` means retry with computed backoff; `Some(Some(s))` means
/// the server dictated the delay; `None` means do not retry.
fn retry_disposition(error: &MemoryError) -> Option<Option<f64>> {
    match error {
        MemoryError::UpstreamRateLimited { retry_after } => Some(*retry_after),
        MemoryError::UpstreamStatus { status: 529, .. } => Some(None),
        _ => None,
    }
}

/// Backoff for the nth retry: 1s, 2s, 4s base plus up to 0.4s of jitter,
/// capped at 8s. A retry-after value overrides the computation entirely.
fn retry_delay(attempt: u32, retry_after: Option<f64>) -> f64 {
    if let Some(seconds) = retry_after {
        return seconds;
    }
    let base = f64::from(1u32 << (attempt - 1).min(3));
    let jitter = rand::random::<f64>() * JITTER_SECONDS;
    (base + jitter).min(MAX_BACKOFF_SECONDS)
}

fn estimate_tokens(prompt: &str) -> u32 {
    (prompt.split_whitespace().count() as f64 * TOKENS_PER_WORD) as u32
}

fn extract_text_content(message: &serde_json::Value) -> String {
    message["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}
