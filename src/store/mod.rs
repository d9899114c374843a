// src/store/mod.rs
// Thin typed wrapper around the Qdrant vector store

use crate::config::MemoryConfig;
use crate::embeddings::EMBEDDING_DIM;
use crate::error::{MemoryError, Result};
use crate::memory::Collection;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, Distance, FieldType,
    Filter, KeywordIndexParamsBuilder, PointId, PointStruct, PointsIdsList, Query,
    QueryPointsBuilder, RetrievedPoint, ScoredPoint, ScrollPointsBuilder, SearchParams,
    SetPayloadPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A hybrid query: prefetch (vector ANN + filter) with optional server-side
/// rescoring formula. When `formula` is `None` the caller gets a vanilla
/// semantic search with the same filter/threshold/params applied directly.
pub struct HybridQuery {
    pub vector: Vec<f32>,
    pub filter: Option<Filter>,
    pub formula: Option<qdrant_client::qdrant::Formula>,
    pub prefetch_limit: u64,
    pub score_threshold: Option<f32>,
    pub params: Option<SearchParams>,
}

/// Typed wrapper over the Qdrant client.
///
/// Construction is cheap; the underlying gRPC channel is pooled and safe to
/// share. All operations surface failures as
/// [`MemoryError::StoreUnavailable`] so callers can degrade uniformly.
pub struct VectorStore {
    client: Qdrant,
}

impl VectorStore {
    /// Connect to the vector store using configured host/port/key/TLS.
    pub fn connect(config: &MemoryConfig) -> Result<Self> {
        let client = Qdrant::from_url(&config.qdrant_url())
            .api_key(config.qdrant_api_key.clone())
            .timeout(Duration::from_secs(config.qdrant_timeout_seconds))
            .skip_compatibility_check()
            .build()
            .map_err(|e| MemoryError::StoreUnavailable(e.to_string()))?;
        Ok(Self { client })
    }

    /// Ensure all four collections exist and carry the tenant-co-locating
    /// keyword index on `group_id`. Idempotent; called once at init.
    pub async fn ensure_collections(&self) -> Result<()> {
        for collection in Collection::ALL {
            self.ensure_collection(collection.as_str()).await?;
            self.create_group_id_index(collection.as_str()).await?;
        }
        Ok(())
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        let exists = self
            .client
            .collection_exists(collection)
            .await
            .map_err(|e| MemoryError::StoreUnavailable(e.to_string()))?;
        if exists {
            return Ok(());
        }

        info!(collection, "creating vector collection");
        match self
            .client
            .create_collection(
                CreateCollectionBuilder::new(collection).vectors_config(
                    qdrant_client::qdrant::VectorParamsBuilder::new(
                        EMBEDDING_DIM as u64,
                        Distance::Cosine,
                    ),
                ),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("already exists") => {
                // Another process created it between our check and create
                debug!(collection, "collection already exists");
                Ok(())
            }
            Err(e) => Err(MemoryError::StoreUnavailable(e.to_string())),
        }
    }

    /// Create the keyword payload index on `group_id`, declared as tenant
    /// so the planner co-locates same-tenant vectors and can skip ANN for
    /// low-selectivity tenant queries.
    pub async fn create_group_id_index(&self, collection: &str) -> Result<()> {
        self.client
            .create_field_index(
                CreateFieldIndexCollectionBuilder::new(collection, "group_id", FieldType::Keyword)
                    .field_index_params(KeywordIndexParamsBuilder::default().is_tenant(true)),
            )
            .await
            .map_err(|e| MemoryError::StoreUnavailable(e.to_string()))?;
        info!(collection, field = "group_id", "tenant payload index ensured");
        Ok(())
    }

    /// Upsert a single point with its payload.
    pub async fn upsert(
        &self,
        collection: Collection,
        id: Uuid,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> Result<()> {
        let payload = Payload::try_from(payload)
            .map_err(|e| MemoryError::Other(format!("payload not a JSON object: {e}")))?;
        let point = PointStruct::new(id.to_string(), vector, payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection.as_str(), vec![point]).wait(true))
            .await
            .map_err(|e| {
                warn!(collection = %collection, error = %e, "upsert failed");
                MemoryError::StoreUnavailable(e.to_string())
            })?;

        debug!(collection = %collection, id = %id, "point upserted");
        Ok(())
    }

    /// Single round-trip ranked query: ANN prefetch, then optional
    /// server-side formula rescoring.
    pub async fn query_points(
        &self,
        collection: Collection,
        query: HybridQuery,
        limit: u64,
    ) -> Result<Vec<ScoredPoint>> {
        let mut builder = QueryPointsBuilder::new(collection.as_str())
            .limit(limit)
            .with_payload(true);

        match query.formula {
            Some(formula) => {
                // Rescoring path: semantic search and filtering happen in
                // the prefetch, the formula re-ranks the candidate set.
                let mut prefetch = qdrant_client::qdrant::PrefetchQueryBuilder::default()
                    .query(Query::new_nearest(query.vector))
                    .limit(query.prefetch_limit);
                if let Some(filter) = query.filter {
                    prefetch = prefetch.filter(filter);
                }
                if let Some(threshold) = query.score_threshold {
                    prefetch = prefetch.score_threshold(threshold);
                }
                if let Some(params) = query.params {
                    prefetch = prefetch.params(params);
                }
                builder = builder
                    .add_prefetch(prefetch)
                    .query(Query::new_formula(formula));
            }
            None => {
                builder = builder.query(Query::new_nearest(query.vector));
                if let Some(filter) = query.filter {
                    builder = builder.filter(filter);
                }
                if let Some(threshold) = query.score_threshold {
                    builder = builder.score_threshold(threshold);
                }
                if let Some(params) = query.params {
                    builder = builder.params(params);
                }
            }
        }

        let response = self
            .client
            .query(builder)
            .await
            .map_err(|e| MemoryError::StoreUnavailable(e.to_string()))?;
        Ok(response.result)
    }

    /// Scroll points matching a filter. Returns the page and the offset for
    /// the next one (`None` when exhausted).
    pub async fn scroll(
        &self,
        collection: Collection,
        filter: Option<Filter>,
        limit: u32,
        offset: Option<PointId>,
    ) -> Result<(Vec<RetrievedPoint>, Option<PointId>)> {
        let mut builder = ScrollPointsBuilder::new(collection.as_str())
            .limit(limit)
            .with_payload(true)
            .with_vectors(false);
        if let Some(filter) = filter {
            builder = builder.filter(filter);
        }
        if let Some(offset) = offset {
            builder = builder.offset(offset);
        }

        let response = self
            .client
            .scroll(builder)
            .await
            .map_err(|e| MemoryError::StoreUnavailable(e.to_string()))?;
        Ok((response.result, response.next_page_offset))
    }

    /// Merge payload fields into a batch of points.
    pub async fn set_payload(
        &self,
        collection: Collection,
        point_ids: Vec<PointId>,
        payload: HashMap<String, QdrantValue>,
    ) -> Result<()> {
        self.client
            .set_payload(
                SetPayloadPointsBuilder::new(collection.as_str(), Payload::from(payload))
                    .points_selector(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await
            .map_err(|e| MemoryError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Exact point count for a collection.
    pub async fn count(&self, collection: Collection) -> Result<u64> {
        let response = self
            .client
            .count(
                qdrant_client::qdrant::CountPointsBuilder::new(collection.as_str()).exact(true),
            )
            .await
            .map_err(|e| MemoryError::StoreUnavailable(e.to_string()))?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    /// Lightweight health probe: list collections. Never raises.
    pub async fn check_health(&self) -> bool {
        match self.client.list_collections().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "vector store unhealthy");
                false
            }
        }
    }
}

/// Keyword equality condition on a payload field
pub fn field_eq(key: &str, value: &str) -> Condition {
    Condition::matches(key, value.to_string())
}

/// Keyword "any of" condition on a payload field
pub fn field_any(key: &str, values: Vec<String>) -> Condition {
    Condition::matches(key, values)
}

/// Conjunction filter, or `None` when no conditions apply (an empty Filter
/// and no filter are not the same thing to the planner).
pub fn must_filter(conditions: Vec<Condition>) -> Option<Filter> {
    if conditions.is_empty() {
        None
    } else {
        Some(Filter::must(conditions))
    }
}
