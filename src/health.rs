// src/health.rs
// Service health aggregation for the status command

use crate::config::MemoryConfig;
use crate::embeddings::EmbeddingClient;
use crate::memory::Collection;
use crate::queue::{QueueStats, RetryQueue};
use crate::store::VectorStore;
use serde::Serialize;
use std::sync::Arc;

/// Size assessment of one collection against the configured thresholds.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionSize {
    pub collection: String,
    pub points: u64,
    /// "ok", "warning", or "critical"
    pub level: &'static str,
}

/// Aggregated health snapshot across the substrate's dependencies.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub embedding_service: bool,
    pub vector_store: bool,
    pub collections: Vec<CollectionSize>,
    pub queue: QueueStats,
    pub healthy: bool,
}

/// Probe every dependency. Never fails: unreachable services read as
/// unhealthy, a broken queue reads as empty, uncountable collections are
/// omitted.
pub async fn check_health(config: Arc<MemoryConfig>) -> HealthReport {
    let embeddings = EmbeddingClient::new(&config);
    let embedding_service = embeddings.health_check().await;

    let mut vector_store = false;
    let mut collections = Vec::new();
    if let Ok(store) = VectorStore::connect(&config) {
        vector_store = store.check_health().await;
        if vector_store {
            for collection in Collection::ALL {
                if let Ok(points) = store.count(*collection).await {
                    let level = if points as usize >= config.collection_size_critical {
                        "critical"
                    } else if points as usize >= config.collection_size_warning {
                        "warning"
                    } else {
                        "ok"
                    };
                    collections.push(CollectionSize {
                        collection: collection.as_str().to_string(),
                        points,
                        level,
                    });
                }
            }
        }
    }

    let queue = RetryQueue::new(config.queue_path.clone())
        .and_then(|q| q.get_stats())
        .unwrap_or_default();

    HealthReport {
        embedding_service,
        vector_store,
        collections,
        healthy: embedding_service && vector_store,
        queue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_never_fails_with_services_down() {
        let mut config = MemoryConfig::default();
        let dir = tempfile::tempdir().unwrap();
        config.queue_path = dir.path().join("q.jsonl");
        // Ports where nothing listens
        config.embedding_host = "127.0.0.1".to_string();
        config.embedding_port = 1026;
        config.qdrant_host = "127.0.0.1".to_string();
        config.qdrant_port = 1025;

        let report = check_health(Arc::new(config)).await;
        assert!(!report.embedding_service);
        assert!(!report.vector_store);
        assert!(!report.healthy);
        assert!(report.collections.is_empty());
        assert_eq!(report.queue.total, 0);
    }
}
