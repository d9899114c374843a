// tests/storage_pipeline.rs
// Degraded-path behavior of the storage pipeline

mod common;

use engram::config::MemoryConfig;
use engram::error::MemoryError;
use engram::memory::{Collection, MemoryType, SourceHook};
use engram::storage::{MemoryStorage, StoreOutcome, StoreRequest};
use std::sync::Arc;

fn pipeline_config(dir: &std::path::Path) -> MemoryConfig {
    let mut config = MemoryConfig::default();
    config.install_dir = dir.to_path_buf();
    config.queue_path = dir.join("queue").join("pending_queue.jsonl");
    // Vector store is always unreachable in these tests
    config.qdrant_host = "127.0.0.1".to_string();
    config.qdrant_port = 1025;
    config.embedding_host = "127.0.0.1".to_string();
    config.embedding_port = 1026;
    config.classifier.enabled = false;
    config
}

fn request(content: &str) -> StoreRequest {
    StoreRequest::new(
        content,
        "/tmp/test-project",
        MemoryType::Implementation,
        SourceHook::PostToolUse,
        "s-1",
        Collection::CodePatterns,
    )
}

#[tokio::test]
async fn test_validation_errors_surface_to_caller() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(pipeline_config(dir.path()));
    let storage = MemoryStorage::new(config).unwrap();

    let err = storage.store_memory(request("short")).await.unwrap_err();
    let MemoryError::Validation(errors) = err else {
        panic!("expected validation error");
    };
    assert!(errors.iter().any(|e| e.contains("too short")));
}

#[tokio::test]
async fn test_store_outage_queues_record() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(pipeline_config(dir.path()));
    let storage = MemoryStorage::new(config).unwrap();

    let outcome = storage
        .store_memory(request("def foo(): return 1"))
        .await
        .unwrap();
    let StoreOutcome::Queued { queue_id } = outcome else {
        panic!("expected queued outcome with the store down");
    };
    assert!(queue_id.is_some());

    // The queue file holds the full payload for later replay
    let entries = storage.queue().read_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].failure_reason, "QDRANT_UNAVAILABLE");
    assert_eq!(entries[0].memory_data["content"], "def foo(): return 1");
    assert_eq!(entries[0].memory_data["collection"], "code-patterns");
    // Embedding was also down: the queued record carries pending status
    assert_eq!(entries[0].memory_data["embedding_status"], "pending");
}

#[tokio::test]
async fn test_embedding_up_store_down_keeps_complete_status() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = pipeline_config(dir.path());

    // Real (mocked) embedding service: dedupe scroll fails open, one
    // embed call succeeds, upsert fails, record queues as complete.
    let responses = vec![common::embeddings_response(1, 768)];
    let base_url = common::serve_responses(responses).await;
    let port: u16 = base_url.rsplit(':').next().unwrap().parse().unwrap();
    config.embedding_port = port;

    let storage = MemoryStorage::new(Arc::new(config)).unwrap();
    let outcome = storage
        .store_memory(request("fn embedded() -> bool { true }"))
        .await
        .unwrap();
    assert!(matches!(outcome, StoreOutcome::Queued { .. }));

    let entries = storage.queue().read_all().unwrap();
    assert_eq!(entries[0].memory_data["embedding_status"], "complete");
}

#[tokio::test]
async fn test_retry_failure_increments_retry_count() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(pipeline_config(dir.path()));
    let storage = MemoryStorage::new(config).unwrap();

    storage
        .store_memory(request("def queued(): pass"))
        .await
        .unwrap();

    let entry = storage.queue().read_all().unwrap().remove(0);
    // Store still down: the retry fails and bumps the retry counter
    // without re-enqueueing a second copy
    let err = storage.retry_entry(&entry).await.unwrap_err();
    assert!(err.is_transient());

    let entries = storage.queue().read_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].retry_count, 1);
}

#[tokio::test]
async fn test_batch_outcomes_are_one_to_one() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(pipeline_config(dir.path()));
    let storage = MemoryStorage::new(config).unwrap();

    let outcomes = storage
        .store_memories_batch(vec![
            request("def first(): return 1"),
            request("no"), // invalid: too short
            request("def third(): return 3"),
        ])
        .await;

    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0], Ok(StoreOutcome::Queued { .. })));
    assert!(matches!(outcomes[1], Err(MemoryError::Validation(_))));
    assert!(matches!(outcomes[2], Ok(StoreOutcome::Queued { .. })));
}
