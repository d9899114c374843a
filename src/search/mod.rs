// src/search/mod.rs
// Memory retrieval: hybrid semantic + decay search with project scoping

pub mod decay;
pub mod jira;

pub use decay::{build_decay_formula, compute_decay_score, resolve_half_life};
pub use jira::{JiraSearchFilters, JiraSearchResult};

use crate::config::{detect_project, MemoryConfig};
use crate::embeddings::EmbeddingClient;
use crate::error::Result;
use crate::memory::Collection;
use crate::metrics;
use crate::store::{field_any, field_eq, must_filter, HybridQuery, VectorStore};
use chrono::Utc;
use qdrant_client::qdrant::{Condition, SearchParamsBuilder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// ANN candidate pool handed to the rescoring formula
const DEFAULT_PREFETCH_LIMIT: u64 = 50;

/// Scores at or above this render with full content
const HIGH_RELEVANCE_THRESHOLD: f32 = 0.90;

/// Scores below this are excluded from injection entirely
const MEDIUM_RELEVANCE_THRESHOLD: f32 = 0.50;

/// Medium-tier content budget in characters
const MEDIUM_TIER_CONTENT_BUDGET: usize = 500;

/// One retrieved memory: id, fused score, owning collection, and the full
/// stored payload flattened alongside.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub collection: String,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl SearchResult {
    pub fn content(&self) -> &str {
        self.payload.get("content").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn memory_type(&self) -> &str {
        self.payload.get("type").and_then(|v| v.as_str()).unwrap_or("unknown")
    }
}

/// Search options beyond the query itself.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Explicit project filter. `Some(None)` forces no project filter
    /// (shared collections); `None` resolves from `cwd`.
    pub group_id: Option<Option<String>>,
    /// Working directory for project detection when group_id is unset
    pub cwd: Option<String>,
    pub limit: Option<usize>,
    pub score_threshold: Option<f32>,
    /// Filter by one or several memory types
    pub memory_types: Vec<String>,
    /// Filter by payload source (e.g. "github")
    pub source: Option<String>,
    /// Trade recall for latency with a low hnsw_ef
    pub fast_mode: bool,
}

/// Memory search over the vector store. Reuse one instance: both clients
/// pool connections.
pub struct MemorySearch {
    config: Arc<MemoryConfig>,
    store: Arc<VectorStore>,
    embeddings: Arc<EmbeddingClient>,
}

impl MemorySearch {
    pub fn new(config: Arc<MemoryConfig>) -> Result<Self> {
        let store = Arc::new(VectorStore::connect(&config)?);
        let embeddings = Arc::new(EmbeddingClient::new(&config));
        Ok(Self {
            config,
            store,
            embeddings,
        })
    }

    pub fn with_parts(
        config: Arc<MemoryConfig>,
        store: Arc<VectorStore>,
        embeddings: Arc<EmbeddingClient>,
    ) -> Self {
        Self {
            config,
            store,
            embeddings,
        }
    }

    /// Search one collection with hybrid semantic + decay scoring.
    ///
    /// `group_id` resolution: an explicit filter wins; otherwise `cwd` is
    /// resolved through project detection; an explicit `Some(None)` means
    /// no project filter at all (shared collections).
    pub async fn search(
        &self,
        query: &str,
        collection: Collection,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let group_id = self.resolve_group_id(options);
        let limit = options.limit.unwrap_or(self.config.max_retrievals);
        let score_threshold = options
            .score_threshold
            .unwrap_or(self.config.similarity_threshold);

        let query_vector = self.embeddings.embed_one(query).await?;

        let mut conditions: Vec<Condition> = Vec::new();
        if let Some(group_id) = &group_id {
            conditions.push(field_eq("group_id", group_id));
            debug!(group_id = %group_id, collection = %collection, "group_id filter applied");
        } else {
            debug!(collection = %collection, "no group_id filter");
        }
        match options.memory_types.len() {
            0 => {}
            1 => conditions.push(field_eq("type", &options.memory_types[0])),
            _ => conditions.push(field_any("type", options.memory_types.clone())),
        }
        if let Some(source) = &options.source {
            conditions.push(field_eq("source", source));
        }

        let hnsw_ef = if options.fast_mode {
            self.config.hnsw_ef_fast
        } else {
            self.config.hnsw_ef_accurate
        };

        let hybrid = HybridQuery {
            vector: query_vector,
            filter: must_filter(conditions),
            formula: build_decay_formula(collection, &self.config, Utc::now()),
            prefetch_limit: DEFAULT_PREFETCH_LIMIT.max(limit as u64),
            score_threshold: Some(score_threshold),
            params: Some(SearchParamsBuilder::default().hnsw_ef(hnsw_ef).into()),
        };

        let start = Instant::now();
        let points = match self.store.query_points(collection, hybrid, limit as u64).await {
            Ok(points) => points,
            Err(e) => {
                metrics::push_retrieval(
                    &self.config,
                    collection.as_str(),
                    "failed",
                    start.elapsed().as_secs_f64(),
                );
                metrics::push_failure_event(&self.config, "qdrant", "QDRANT_UNAVAILABLE");
                warn!(collection = %collection, error = %e, "search failed");
                return Err(e);
            }
        };

        let results: Vec<SearchResult> = points
            .into_iter()
            .map(|point| {
                let id = point
                    .id
                    .as_ref()
                    .map(|id| match &id.point_id_options {
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => u.clone(),
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => {
                            n.to_string()
                        }
                        None => String::new(),
                    })
                    .unwrap_or_default();
                let payload = point
                    .payload
                    .into_iter()
                    .map(|(k, v)| (k, qdrant_value_to_json(v)))
                    .collect();
                SearchResult {
                    id,
                    score: point.score,
                    collection: collection.as_str().to_string(),
                    payload,
                }
            })
            .collect();

        let status = if results.is_empty() { "empty" } else { "success" };
        metrics::push_retrieval(
            &self.config,
            collection.as_str(),
            status,
            start.elapsed().as_secs_f64(),
        );
        info!(
            collection = %collection,
            results_count = results.len(),
            group_id = ?group_id,
            threshold = score_threshold,
            "search completed"
        );

        Ok(results)
    }

    /// Query the per-project collection and the shared conventions
    /// collection in parallel. The shared side always passes no project
    /// filter.
    pub async fn search_both_collections(
        &self,
        query: &str,
        collection: Collection,
        options: &SearchOptions,
    ) -> Result<(Vec<SearchResult>, Vec<SearchResult>)> {
        let mut shared_options = options.clone();
        shared_options.group_id = Some(None);

        let (project, shared) = tokio::join!(
            self.search(query, collection, options),
            self.search(query, Collection::Conventions, &shared_options)
        );

        // A failure on one side does not void the other
        let project = project.unwrap_or_else(|e| {
            warn!(error = %e, "project-side search failed");
            Vec::new()
        });
        let shared = shared.unwrap_or_else(|e| {
            warn!(error = %e, "shared-side search failed");
            Vec::new()
        });

        info!(
            project_count = project.len(),
            shared_count = shared.len(),
            "dual-collection search completed"
        );
        Ok((project, shared))
    }

    /// Search the primary collection, then fill any shortfall from the
    /// secondary collections in order. Per-collection score ordering is
    /// preserved; results are concatenated, not re-ranked.
    pub async fn cascading_search(
        &self,
        query: &str,
        primary: Collection,
        secondary: &[Collection],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let limit = options.limit.unwrap_or(self.config.max_retrievals);
        let mut results = self.search(query, primary, options).await?;

        for collection in secondary {
            if results.len() >= limit {
                break;
            }
            let mut remaining_options = options.clone();
            remaining_options.limit = Some(limit - results.len());
            match self.search(query, *collection, &remaining_options).await {
                Ok(more) => results.extend(more),
                Err(e) => {
                    warn!(collection = %collection, error = %e, "cascade step failed, continuing");
                }
            }
        }

        Ok(results)
    }

    /// Convenience search over the shared conventions collection with no
    /// project filter. Returns an empty list on any failure.
    pub async fn retrieve_best_practices(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        let options = SearchOptions {
            group_id: Some(None),
            limit: Some(limit),
            ..SearchOptions::default()
        };
        match self.search(query, Collection::Conventions, &options).await {
            Ok(results) => {
                info!(
                    query = %query.chars().take(50).collect::<String>(),
                    count = results.len(),
                    "best practices retrieved"
                );
                results
            }
            Err(e) => {
                warn!(error = %e, "best practice retrieval failed");
                Vec::new()
            }
        }
    }

    fn resolve_group_id(&self, options: &SearchOptions) -> Option<String> {
        match &options.group_id {
            Some(explicit) => explicit.clone(),
            None => options.cwd.as_deref().map(detect_project),
        }
    }
}

/// Format results into tiered markdown for context injection.
///
/// High-relevance results (score >= 0.90) render full content; medium
/// (0.50-0.90) render truncated to 500 chars; everything below is
/// excluded.
pub fn format_tiered_results(results: &[SearchResult]) -> String {
    let high: Vec<&SearchResult> = results
        .iter()
        .filter(|r| r.score >= HIGH_RELEVANCE_THRESHOLD)
        .collect();
    let medium: Vec<&SearchResult> = results
        .iter()
        .filter(|r| r.score >= MEDIUM_RELEVANCE_THRESHOLD && r.score < HIGH_RELEVANCE_THRESHOLD)
        .collect();

    let mut output = Vec::new();

    if !high.is_empty() {
        output.push("## High Relevance Memories (>90%)".to_string());
        for result in high {
            output.push(format!(
                "\n### {} ({:.0}%)",
                result.memory_type(),
                result.score * 100.0
            ));
            output.push(result.content().to_string());
        }
    }

    if !medium.is_empty() {
        output.push("\n## Medium Relevance Memories (50-90%)".to_string());
        for result in medium {
            output.push(format!(
                "\n### {} ({:.0}%)",
                result.memory_type(),
                result.score * 100.0
            ));
            let content = result.content();
            if content.chars().count() > MEDIUM_TIER_CONTENT_BUDGET {
                let truncated: String = content.chars().take(MEDIUM_TIER_CONTENT_BUDGET).collect();
                output.push(format!("{truncated}..."));
            } else {
                output.push(content.to_string());
            }
        }
    }

    output.join("\n")
}

fn qdrant_value_to_json(value: qdrant_client::qdrant::Value) -> serde_json::Value {
    use qdrant_client::qdrant::value::Kind;
    match value.kind {
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
        Some(Kind::DoubleValue(d)) => serde_json::json!(d),
        Some(Kind::IntegerValue(i)) => serde_json::json!(i),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::StructValue(s)) => serde_json::Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, qdrant_value_to_json(v)))
                .collect(),
        ),
        Some(Kind::ListValue(l)) => {
            serde_json::Value::Array(l.values.into_iter().map(qdrant_value_to_json).collect())
        }
    }
}
