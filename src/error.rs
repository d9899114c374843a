// src/error.rs
// Standardized error types for the memory substrate

use thiserror::Error;

/// Main error type for the engram library
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),

    #[error("embedding request timed out")]
    EmbeddingTimeout,

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("rate limit queue timeout after {0:.1}s")]
    QueueTimeout(f64),

    #[error("queue depth {depth} exceeds limit {limit}")]
    QueueDepthExceeded { depth: usize, limit: usize },

    #[error("circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("lock acquisition timed out after {0:.1}s")]
    LockTimeout(f64),

    #[error("classifier provider error: {0}")]
    Provider(String),

    #[error("upstream API error (status {status}): {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("upstream rate limited (429)")]
    UpstreamRateLimited { retry_after: Option<f64> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using MemoryError
pub type Result<T> = std::result::Result<T, MemoryError>;

impl MemoryError {
    /// Stable error code used as a `failure_reason` in the retry queue and
    /// as a metric label value.
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::Validation(_) => "VALIDATION_ERROR",
            MemoryError::EmbeddingTimeout => "EMBEDDING_TIMEOUT",
            MemoryError::Embedding(_) => "EMBEDDING_ERROR",
            MemoryError::StoreUnavailable(_) => "QDRANT_UNAVAILABLE",
            MemoryError::QueueTimeout(_) => "QUEUE_TIMEOUT",
            MemoryError::QueueDepthExceeded { .. } => "QUEUE_DEPTH_EXCEEDED",
            MemoryError::CircuitOpen(_) => "CIRCUIT_OPEN",
            MemoryError::LockTimeout(_) => "LOCK_TIMEOUT",
            MemoryError::Provider(_) => "PROVIDER_ERROR",
            MemoryError::UpstreamStatus { .. } => "UPSTREAM_STATUS",
            MemoryError::UpstreamRateLimited { .. } => "UPSTREAM_RATE_LIMITED",
            MemoryError::Io(_) => "IO_ERROR",
            MemoryError::Json(_) => "JSON_ERROR",
            MemoryError::Http(_) => "HTTP_ERROR",
            MemoryError::Config(_) => "CONFIG_ERROR",
            MemoryError::Other(_) | MemoryError::Anyhow(_) => "UNKNOWN",
        }
    }

    /// Whether this error is a transient infrastructure failure that the
    /// storage pipeline degrades around instead of surfacing.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MemoryError::EmbeddingTimeout
                | MemoryError::Embedding(_)
                | MemoryError::StoreUnavailable(_)
                | MemoryError::QueueTimeout(_)
                | MemoryError::QueueDepthExceeded { .. }
                | MemoryError::CircuitOpen(_)
                | MemoryError::LockTimeout(_)
                | MemoryError::Provider(_)
        )
    }
}

impl From<String> for MemoryError {
    fn from(s: String) -> Self {
        MemoryError::Other(s)
    }
}

impl From<tokio::task::JoinError> for MemoryError {
    fn from(err: tokio::task::JoinError) -> Self {
        MemoryError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_code_matches_queue_reason() {
        let err = MemoryError::StoreUnavailable("connection refused".into());
        assert_eq!(err.code(), "QDRANT_UNAVAILABLE");
        assert!(err.is_transient());
    }

    #[test]
    fn test_validation_is_not_transient() {
        let err = MemoryError::Validation(vec!["Missing required field: content".into()]);
        assert!(!err.is_transient());
    }
}
