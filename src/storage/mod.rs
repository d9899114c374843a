// src/storage/mod.rs
// Storage pipeline: validate -> classify -> dedupe -> embed -> upsert
//
// Every failure degrades: embedding outages store a zero-vector
// placeholder with a pending status, vector-store outages queue the
// record to disk. Only validation errors surface to the caller.

use crate::classifier;
use crate::config::{detect_project, MemoryConfig};
use crate::embeddings::{EmbeddingClient, EMBEDDING_DIM};
use crate::error::{MemoryError, Result};
use crate::memory::{
    compute_content_hash, validate_payload, Collection, EmbeddingStatus, MemoryPayload, MemoryType,
    SourceHook,
};
use crate::metrics;
use crate::queue::{QueueEntry, RetryQueue};
use crate::store::{field_eq, must_filter, VectorStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Failure reason recorded when the vector store rejects an upsert
const REASON_STORE_UNAVAILABLE: &str = "QDRANT_UNAVAILABLE";

/// Outcome of a store operation. Serializes to the hook-facing
/// `{status: ...}` shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StoreOutcome {
    Stored {
        memory_id: String,
        embedding_status: EmbeddingStatus,
    },
    Duplicate {
        memory_id: String,
    },
    Queued {
        #[serde(skip_serializing_if = "Option::is_none")]
        queue_id: Option<String>,
    },
}

/// One store request. `timestamp` overrides the stamped `stored_at` for
/// captures that happened earlier than the store call.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub content: String,
    pub cwd: String,
    pub memory_type: MemoryType,
    pub source_hook: SourceHook,
    pub session_id: String,
    pub collection: Collection,
    pub turn_number: Option<u64>,
    pub timestamp: Option<String>,
    pub file_path: Option<String>,
    pub tags: Vec<String>,
}

impl StoreRequest {
    pub fn new(
        content: impl Into<String>,
        cwd: impl Into<String>,
        memory_type: MemoryType,
        source_hook: SourceHook,
        session_id: impl Into<String>,
        collection: Collection,
    ) -> Self {
        Self {
            content: content.into(),
            cwd: cwd.into(),
            memory_type,
            source_hook,
            session_id: session_id.into(),
            collection,
            turn_number: None,
            timestamp: None,
            file_path: None,
            tags: Vec::new(),
        }
    }
}

/// The storage pipeline. Owns long-lived clients; share one instance.
pub struct MemoryStorage {
    config: Arc<MemoryConfig>,
    store: Arc<VectorStore>,
    embeddings: Arc<EmbeddingClient>,
    queue: RetryQueue,
}

impl MemoryStorage {
    pub fn new(config: Arc<MemoryConfig>) -> Result<Self> {
        let store = Arc::new(VectorStore::connect(&config)?);
        let embeddings = Arc::new(EmbeddingClient::new(&config));
        let queue = RetryQueue::new(config.queue_path.clone())?;
        Ok(Self {
            config,
            store,
            embeddings,
            queue,
        })
    }

    /// Assemble from pre-built parts (tests, shared clients).
    pub fn with_parts(
        config: Arc<MemoryConfig>,
        store: Arc<VectorStore>,
        embeddings: Arc<EmbeddingClient>,
        queue: RetryQueue,
    ) -> Self {
        Self {
            config,
            store,
            embeddings,
            queue,
        }
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    /// Store one memory.
    ///
    /// Returns `Duplicate` when the `(content_hash, group_id)` pair
    /// already exists in the collection, `Queued` when the vector store
    /// is unavailable, `Stored` otherwise. Embedding failures do not stop
    /// the store: the record goes in with a zero-vector placeholder and
    /// `embedding_status = pending`, searchable by payload filters until
    /// a backfill re-embeds it.
    pub async fn store_memory(&self, request: StoreRequest) -> Result<StoreOutcome> {
        let group_id = detect_project(&request.cwd);
        let mut payload = self.build_payload(&request, group_id);

        let errors = validate_payload(&payload.to_value());
        if !errors.is_empty() {
            return Err(MemoryError::Validation(errors));
        }

        // Optional reclassification; disabled classifier is a no-op
        if self.config.classifier.enabled {
            let result = classifier::classify(
                &self.config,
                &payload.content,
                request.collection,
                payload.memory_type,
            )
            .await;
            if result.was_reclassified {
                payload.memory_type = result.classified_type;
            }
            for tag in result.tags {
                if !payload.tags.contains(&tag) {
                    payload.tags.push(tag);
                }
            }
        }

        // Content-hash dedupe within (collection, group_id). This is the
        // only dedupe authority; similarity dedup belongs to offline jobs.
        match self.find_duplicate(request.collection, &payload).await {
            Ok(Some(existing_id)) => {
                info!(
                    collection = %request.collection,
                    group_id = %payload.group_id,
                    memory_id = %existing_id,
                    "duplicate content, returning existing id"
                );
                metrics::push_dedup_outcome(&self.config, "duplicate", &payload.group_id);
                return Ok(StoreOutcome::Duplicate {
                    memory_id: existing_id,
                });
            }
            Ok(None) => {
                metrics::push_dedup_outcome(&self.config, "unique", &payload.group_id);
            }
            Err(e) => {
                // Fail open: a broken dedupe check must not lose the
                // memory; the upsert below decides what happens.
                warn!(error = %e, "dedupe check failed, storing anyway");
            }
        }

        let (vector, embedding_status) = self.embed_or_placeholder(&payload.content).await;
        payload.embedding_status = embedding_status;

        self.finish_upsert(request.collection, payload, vector).await
    }

    /// Batch store: one embedding call for all non-duplicate records,
    /// per-record dedupe semantics, and a 1:1 outcome vector.
    pub async fn store_memories_batch(
        &self,
        requests: Vec<StoreRequest>,
    ) -> Vec<Result<StoreOutcome>> {
        // Dedupe pass first so the embed batch only carries new content
        let mut prepared: Vec<Option<(Collection, MemoryPayload)>> = Vec::with_capacity(requests.len());
        let mut outcomes: Vec<Option<Result<StoreOutcome>>> = Vec::with_capacity(requests.len());

        for request in &requests {
            let group_id = detect_project(&request.cwd);
            let payload = self.build_payload(request, group_id);

            let errors = validate_payload(&payload.to_value());
            if !errors.is_empty() {
                outcomes.push(Some(Err(MemoryError::Validation(errors))));
                prepared.push(None);
                continue;
            }

            match self.find_duplicate(request.collection, &payload).await {
                Ok(Some(existing_id)) => {
                    metrics::push_dedup_outcome(&self.config, "duplicate", &payload.group_id);
                    outcomes.push(Some(Ok(StoreOutcome::Duplicate {
                        memory_id: existing_id,
                    })));
                    prepared.push(None);
                }
                _ => {
                    outcomes.push(None);
                    prepared.push(Some((request.collection, payload)));
                }
            }
        }

        // One embedding round-trip where possible
        let texts: Vec<String> = prepared
            .iter()
            .flatten()
            .map(|(_, p)| p.content.clone())
            .collect();
        let embed_result = self.embeddings.embed(&texts).await;
        let (mut vectors, batch_status) = match embed_result {
            Ok(vectors) => (vectors.into_iter(), EmbeddingStatus::Complete),
            Err(e) => {
                warn!(error = %e, "batch embedding failed, storing placeholders");
                (Vec::<Vec<f32>>::new().into_iter(), EmbeddingStatus::Pending)
            }
        };

        for (idx, slot) in prepared.into_iter().enumerate() {
            let Some((collection, mut payload)) = slot else {
                continue;
            };
            let vector = if batch_status == EmbeddingStatus::Complete {
                vectors.next().unwrap_or_else(zero_vector)
            } else {
                zero_vector()
            };
            payload.embedding_status = batch_status;
            let outcome = self
                .finish_upsert(collection, payload, vector)
                .await;
            outcomes[idx] = Some(outcome);
        }

        outcomes
            .into_iter()
            .map(|o| o.unwrap_or(Ok(StoreOutcome::Queued { queue_id: None })))
            .collect()
    }

    /// Retry path for queued entries: re-embed and upsert, skipping the
    /// dedupe check and never re-enqueueing its own failures. Success
    /// dequeues the entry; failure bumps its retry count.
    pub async fn retry_entry(&self, entry: &QueueEntry) -> Result<StoreOutcome> {
        let payload: MemoryPayload = serde_json::from_value(entry.memory_data.clone())?;
        let collection = entry
            .memory_data
            .get("collection")
            .and_then(|c| c.as_str())
            .and_then(Collection::parse)
            .unwrap_or(Collection::Discussions);

        let (vector, embedding_status) = self.embed_or_placeholder(&payload.content).await;
        let mut payload = payload;
        payload.embedding_status = embedding_status;

        let id = Uuid::new_v4();
        match self
            .store
            .upsert(collection, id, vector, payload_with_collection(&payload, collection))
            .await
        {
            Ok(()) => {
                let queue = self.queue.clone();
                let entry_id = entry.id.clone();
                tokio::task::spawn_blocking(move || queue.dequeue(&entry_id)).await??;
                info!(queue_id = %entry.id, memory_id = %id, "queued memory stored on retry");
                Ok(StoreOutcome::Stored {
                    memory_id: id.to_string(),
                    embedding_status,
                })
            }
            Err(e) => {
                let queue = self.queue.clone();
                let entry_id = entry.id.clone();
                tokio::task::spawn_blocking(move || queue.mark_failed(&entry_id)).await??;
                Err(e)
            }
        }
    }

    /// Drain up to `limit` pending queue entries through the retry path.
    /// Returns (stored, failed) counts.
    pub async fn process_pending(&self, limit: usize) -> Result<(usize, usize)> {
        let queue = self.queue.clone();
        let pending =
            tokio::task::spawn_blocking(move || queue.get_pending(limit, false)).await??;

        let mut stored = 0usize;
        let mut failed = 0usize;
        for entry in &pending {
            match self.retry_entry(entry).await {
                Ok(_) => stored += 1,
                Err(e) => {
                    warn!(queue_id = %entry.id, error = %e, "retry failed");
                    failed += 1;
                }
            }
        }

        if stored > 0 || failed > 0 {
            info!(stored, failed, "retry queue drained");
        }
        Ok((stored, failed))
    }

    fn build_payload(&self, request: &StoreRequest, group_id: String) -> MemoryPayload {
        let content_hash = compute_content_hash(&request.content);
        let mut payload = MemoryPayload::new(
            request.content.clone(),
            content_hash,
            group_id,
            request.memory_type,
            request.source_hook,
            request.session_id.clone(),
        );
        if let Some(ts) = &request.timestamp {
            payload.stored_at = ts.clone();
        }
        payload.turn_number = request.turn_number;
        payload.file_path = request.file_path.clone();
        payload.tags = request.tags.clone();
        payload
    }

    async fn find_duplicate(
        &self,
        collection: Collection,
        payload: &MemoryPayload,
    ) -> Result<Option<String>> {
        let filter = must_filter(vec![
            field_eq("content_hash", &payload.content_hash),
            field_eq("group_id", &payload.group_id),
        ]);
        let (points, _) = self.store.scroll(collection, filter, 1, None).await?;
        Ok(points.first().and_then(|p| p.id.as_ref()).map(point_id_string))
    }

    async fn embed_or_placeholder(&self, content: &str) -> (Vec<f32>, EmbeddingStatus) {
        let start = std::time::Instant::now();
        match self.embeddings.embed_one(content).await {
            Ok(vector) => {
                metrics::push_embedding(&self.config, "success", start.elapsed().as_secs_f64());
                (vector, EmbeddingStatus::Complete)
            }
            Err(e @ (MemoryError::EmbeddingTimeout | MemoryError::Embedding(_))) => {
                warn!(error = %e, "embedding unavailable, storing pending placeholder");
                let status = match &e {
                    MemoryError::EmbeddingTimeout => "timeout",
                    _ => "failed",
                };
                metrics::push_embedding(&self.config, status, start.elapsed().as_secs_f64());
                metrics::push_failure_event(&self.config, "embedding", e.code());
                (zero_vector(), EmbeddingStatus::Pending)
            }
            Err(e) => {
                warn!(error = %e, "unexpected embedding failure, storing pending placeholder");
                (zero_vector(), EmbeddingStatus::Pending)
            }
        }
    }

    async fn finish_upsert(
        &self,
        collection: Collection,
        payload: MemoryPayload,
        vector: Vec<f32>,
    ) -> Result<StoreOutcome> {
        let id = Uuid::new_v4();
        let embedding_status = payload.embedding_status;
        let value = payload_with_collection(&payload, collection);

        match self.store.upsert(collection, id, vector, value.clone()).await {
            Ok(()) => {
                debug!(
                    collection = %collection,
                    memory_id = %id,
                    embedding_status = embedding_status.as_str(),
                    "memory stored"
                );
                metrics::push_capture(&self.config, collection.as_str(), "stored", &payload.group_id);
                metrics::trace::emit_trace_event(
                    &self.config,
                    "memory_store",
                    serde_json::json!({
                        "collection": collection.as_str(),
                        "memory_id": id.to_string(),
                        "embedding_status": embedding_status.as_str(),
                        "content_chars": payload.content.chars().count(),
                    }),
                    Some(&payload.session_id),
                    Some(&payload.group_id),
                );
                Ok(StoreOutcome::Stored {
                    memory_id: id.to_string(),
                    embedding_status,
                })
            }
            Err(e) => {
                warn!(collection = %collection, error = %e, "upsert failed, queueing to disk");
                metrics::push_failure_event(&self.config, "qdrant", REASON_STORE_UNAVAILABLE);

                let queue = self.queue.clone();
                let queue_result = tokio::task::spawn_blocking(move || {
                    queue.enqueue(value, REASON_STORE_UNAVAILABLE, false)
                })
                .await;

                let queue_id = match queue_result {
                    Ok(Ok(id)) => Some(id),
                    Ok(Err(e)) => {
                        warn!(error = %e, "retry queue enqueue failed");
                        None
                    }
                    Err(e) => {
                        warn!(error = %e, "retry queue task failed");
                        None
                    }
                };
                metrics::push_capture(&self.config, collection.as_str(), "queued", &payload.group_id);
                Ok(StoreOutcome::Queued { queue_id })
            }
        }
    }
}

fn zero_vector() -> Vec<f32> {
    vec![0.0; EMBEDDING_DIM]
}

/// Payload JSON enriched with its collection name so queued entries can be
/// replayed into the right collection.
fn payload_with_collection(payload: &MemoryPayload, collection: Collection) -> serde_json::Value {
    let mut value = payload.to_value();
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "collection".to_string(),
            serde_json::Value::from(collection.as_str()),
        );
    }
    value
}

fn point_id_string(id: &qdrant_client::qdrant::PointId) -> String {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    match &id.point_id_options {
        Some(PointIdOptions::Uuid(u)) => u.clone(),
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_outcome_serialization() {
        let outcome = StoreOutcome::Stored {
            memory_id: "abc".to_string(),
            embedding_status: EmbeddingStatus::Pending,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "stored");
        assert_eq!(value["embedding_status"], "pending");

        let queued = StoreOutcome::Queued { queue_id: None };
        let value = serde_json::to_value(&queued).unwrap();
        assert_eq!(value["status"], "queued");
        assert!(value.get("queue_id").is_none());
    }

    #[test]
    fn test_payload_with_collection_round_trip() {
        let payload = MemoryPayload::new(
            "some stored content".to_string(),
            compute_content_hash("some stored content"),
            "proj".to_string(),
            MemoryType::UserMessage,
            SourceHook::SdkWrapper,
            "s-1".to_string(),
        );
        let value = payload_with_collection(&payload, Collection::Discussions);
        assert_eq!(value["collection"], "discussions");

        // The queued form deserializes back into a payload for retry
        let restored: MemoryPayload = serde_json::from_value(value).unwrap();
        assert_eq!(restored.content, "some stored content");
        assert_eq!(restored.memory_type, MemoryType::UserMessage);
    }

    #[test]
    fn test_zero_vector_dimension() {
        let v = zero_vector();
        assert_eq!(v.len(), EMBEDDING_DIM);
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
