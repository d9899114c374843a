// src/config/mod.rs
// Environment-based configuration - single source of truth for all env vars

pub mod project;

pub use project::detect_project;

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Default read timeout for the embedding service (seconds). CPU-backed
/// embedding services can take tens of seconds; GPU mode is typically <2s.
const DEFAULT_EMBEDDING_READ_TIMEOUT: f64 = 15.0;

/// Decay scoring configuration: exponential half-life per type/collection
#[derive(Debug, Clone)]
pub struct DecayConfig {
    /// Master switch for server-side decay scoring
    pub enabled: bool,
    /// Weight of the semantic component; temporal weight is `1 - semantic_weight`
    pub semantic_weight: f32,
    /// Half-life in days for the code-patterns collection
    pub half_life_code_patterns: f64,
    /// Half-life in days for the discussions collection
    pub half_life_discussions: f64,
    /// Half-life in days for the conventions collection
    pub half_life_conventions: f64,
    /// Half-life in days for the jira-data collection
    pub half_life_jira_data: f64,
    /// Per-type half-life overrides in days, e.g. "error_fix:7,decision:90"
    pub type_overrides: BTreeMap<String, f64>,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            semantic_weight: 0.7,
            half_life_code_patterns: 14.0,
            half_life_discussions: 21.0,
            half_life_conventions: 60.0,
            half_life_jira_data: 30.0,
            type_overrides: BTreeMap::new(),
        }
    }
}

/// Global half-life fallback in days for unknown collections
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 21.0;

/// Classifier configuration (provider chain, thresholds, kill switch)
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Master switch; disabled classifier returns the original type untouched
    pub enabled: bool,
    /// Minimum LLM confidence to accept a reclassification
    pub confidence_threshold: f64,
    /// Minimum rule confidence for rule-based classification to short-circuit
    pub rule_confidence_threshold: f64,
    /// First provider tried (e.g. "ollama")
    pub primary_provider: String,
    /// Providers tried after the primary, in order
    pub fallback_providers: Vec<String>,
    /// Per-provider request timeout (seconds)
    pub timeout_seconds: u64,
    /// Max content characters included in the classification prompt
    pub max_input_chars: usize,
    /// Max tokens requested from the LLM
    pub max_output_tokens: u32,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub openrouter_base_url: String,
    pub openrouter_model: String,
    pub anthropic_model: String,
    pub openai_model: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: 0.7,
            rule_confidence_threshold: 0.85,
            primary_provider: "ollama".to_string(),
            fallback_providers: vec!["openrouter".to_string(), "claude".to_string()],
            timeout_seconds: 10,
            max_input_chars: 4000,
            max_output_tokens: 256,
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.2:3b".to_string(),
            openrouter_base_url: "https://openrouter.ai/api/v1".to_string(),
            openrouter_model: "meta-llama/llama-3.2-3b-instruct".to_string(),
            anthropic_model: "claude-3-5-haiku-20241022".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Freshness scanner thresholds (commits since stored_at)
#[derive(Debug, Clone)]
pub struct FreshnessConfig {
    pub enabled: bool,
    pub commit_threshold_aging: u32,
    pub commit_threshold_stale: u32,
    pub commit_threshold_expired: u32,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            commit_threshold_aging: 3,
            commit_threshold_stale: 5,
            commit_threshold_expired: 10,
        }
    }
}

/// Upstream LLM rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
    pub max_queue_depth: usize,
    pub queue_timeout_seconds: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 50,
            tokens_per_minute: 30_000,
            max_queue_depth: 100,
            queue_timeout_seconds: 60.0,
        }
    }
}

/// Immutable process-wide configuration.
///
/// Precedence: environment variables > `.env` file (install dir) > defaults.
/// Out-of-range values log a warning and fall back to the default; loading
/// never fails.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Minimum similarity score for retrieval (0.0-1.0)
    pub similarity_threshold: f32,
    /// Similarity threshold for offline deduplication jobs (0.80-0.99)
    pub dedup_threshold: f32,
    /// Maximum memories to retrieve per search (1-50)
    pub max_retrievals: usize,
    /// Token budget for context injection
    pub token_budget: usize,

    pub qdrant_host: String,
    pub qdrant_port: u16,
    pub qdrant_api_key: Option<String>,
    pub qdrant_use_tls: bool,
    /// Per-operation vector store timeout (seconds)
    pub qdrant_timeout_seconds: u64,

    pub embedding_host: String,
    pub embedding_port: u16,
    /// Read timeout for the embedding service (seconds)
    pub embedding_read_timeout: f64,

    pub log_level: String,
    pub log_format: String,

    pub collection_size_warning: usize,
    pub collection_size_critical: usize,

    /// Installation directory (default ~/.engram)
    pub install_dir: PathBuf,
    /// Retry queue file (default {install_dir}/queue/pending_queue.jsonl)
    pub queue_path: PathBuf,
    /// Audit directory for the freshness log (default .audit)
    pub audit_dir: PathBuf,

    /// HNSW ef for fast_mode searches (recall/latency trade)
    pub hnsw_ef_fast: u64,
    /// HNSW ef for accurate searches
    pub hnsw_ef_accurate: u64,

    /// Kill switch for the trace buffer
    pub trace_enabled: bool,
    /// Trace buffer cap in MB
    pub trace_buffer_max_mb: u64,

    /// Push gateway endpoint for fire-and-forget metrics
    pub pushgateway_url: String,
    pub metrics_enabled: bool,

    pub decay: DecayConfig,
    pub classifier: ClassifierConfig,
    pub freshness: FreshnessConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        let install_dir = default_install_dir();
        let queue_path = install_dir.join("queue").join("pending_queue.jsonl");
        Self {
            similarity_threshold: 0.7,
            dedup_threshold: 0.95,
            max_retrievals: 5,
            token_budget: 2000,
            qdrant_host: "localhost".to_string(),
            qdrant_port: 6334,
            qdrant_api_key: None,
            qdrant_use_tls: false,
            qdrant_timeout_seconds: 10,
            embedding_host: "localhost".to_string(),
            embedding_port: 28080,
            embedding_read_timeout: DEFAULT_EMBEDDING_READ_TIMEOUT,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            collection_size_warning: 10_000,
            collection_size_critical: 50_000,
            install_dir,
            queue_path,
            audit_dir: PathBuf::from(".audit"),
            hnsw_ef_fast: 64,
            hnsw_ef_accurate: 128,
            trace_enabled: false,
            trace_buffer_max_mb: 100,
            pushgateway_url: "http://localhost:9091".to_string(),
            metrics_enabled: false,
            decay: DecayConfig::default(),
            classifier: ClassifierConfig::default(),
            freshness: FreshnessConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn default_install_dir() -> PathBuf {
    std::env::var("ENGRAM_INSTALL_DIR")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".engram")
        })
}

impl MemoryConfig {
    /// Load configuration once at startup.
    ///
    /// Reads `{install_dir}/.env` first (never the CWD - a malicious repo
    /// could override API keys), then overlays environment variables.
    pub fn load() -> Self {
        let install_dir = default_install_dir();
        if let Err(e) = dotenvy::from_path(install_dir.join(".env")) {
            debug!("no .env file loaded: {}", e);
        }
        Self::from_env()
    }

    /// Build configuration from the current environment without touching disk.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let install_dir = default_install_dir();
        let queue_path = env_string("ENGRAM_QUEUE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| install_dir.join("queue").join("pending_queue.jsonl"));

        let decay = DecayConfig {
            enabled: env_bool("ENGRAM_DECAY_ENABLED").unwrap_or(defaults.decay.enabled),
            semantic_weight: env_f64_ranged("ENGRAM_DECAY_SEMANTIC_WEIGHT", 0.7, 0.0, 1.0) as f32,
            half_life_code_patterns: env_f64_ranged(
                "ENGRAM_DECAY_HALF_LIFE_CODE_PATTERNS",
                14.0,
                0.1,
                3650.0,
            ),
            half_life_discussions: env_f64_ranged(
                "ENGRAM_DECAY_HALF_LIFE_DISCUSSIONS",
                21.0,
                0.1,
                3650.0,
            ),
            half_life_conventions: env_f64_ranged(
                "ENGRAM_DECAY_HALF_LIFE_CONVENTIONS",
                60.0,
                0.1,
                3650.0,
            ),
            half_life_jira_data: env_f64_ranged(
                "ENGRAM_DECAY_HALF_LIFE_JIRA_DATA",
                30.0,
                0.1,
                3650.0,
            ),
            type_overrides: parse_type_overrides(
                env_string("ENGRAM_DECAY_TYPE_OVERRIDES").as_deref(),
            ),
        };

        let classifier_defaults = ClassifierConfig::default();
        let classifier = ClassifierConfig {
            enabled: env_bool("ENGRAM_CLASSIFIER_ENABLED").unwrap_or(classifier_defaults.enabled),
            confidence_threshold: env_f64_ranged(
                "ENGRAM_CLASSIFIER_CONFIDENCE_THRESHOLD",
                0.7,
                0.0,
                1.0,
            ),
            rule_confidence_threshold: env_f64_ranged(
                "ENGRAM_CLASSIFIER_RULE_CONFIDENCE_THRESHOLD",
                0.85,
                0.0,
                1.0,
            ),
            primary_provider: env_string("ENGRAM_CLASSIFIER_PRIMARY_PROVIDER")
                .unwrap_or(classifier_defaults.primary_provider),
            fallback_providers: env_string("ENGRAM_CLASSIFIER_FALLBACK_PROVIDERS")
                .map(|s| {
                    s.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or(classifier_defaults.fallback_providers),
            timeout_seconds: env_u64_ranged("ENGRAM_CLASSIFIER_TIMEOUT_SECONDS", 10, 1, 120),
            max_input_chars: env_u64_ranged("ENGRAM_CLASSIFIER_MAX_INPUT_CHARS", 4000, 100, 100_000)
                as usize,
            max_output_tokens: env_u64_ranged("ENGRAM_CLASSIFIER_MAX_OUTPUT_TOKENS", 256, 16, 4096)
                as u32,
            ollama_base_url: env_string("OLLAMA_BASE_URL")
                .unwrap_or(classifier_defaults.ollama_base_url),
            ollama_model: env_string("OLLAMA_MODEL").unwrap_or(classifier_defaults.ollama_model),
            openrouter_base_url: env_string("OPENROUTER_BASE_URL")
                .unwrap_or(classifier_defaults.openrouter_base_url),
            openrouter_model: env_string("OPENROUTER_MODEL")
                .unwrap_or(classifier_defaults.openrouter_model),
            anthropic_model: env_string("ANTHROPIC_MODEL")
                .unwrap_or(classifier_defaults.anthropic_model),
            openai_model: env_string("OPENAI_MODEL").unwrap_or(classifier_defaults.openai_model),
        };

        let freshness = FreshnessConfig {
            enabled: env_bool("ENGRAM_FRESHNESS_ENABLED").unwrap_or(true),
            commit_threshold_aging: env_u64_ranged("ENGRAM_FRESHNESS_AGING_COMMITS", 3, 1, 1000)
                as u32,
            commit_threshold_stale: env_u64_ranged("ENGRAM_FRESHNESS_STALE_COMMITS", 5, 1, 1000)
                as u32,
            commit_threshold_expired: env_u64_ranged(
                "ENGRAM_FRESHNESS_EXPIRED_COMMITS",
                10,
                1,
                1000,
            ) as u32,
        };

        let rate_limit = RateLimitConfig {
            requests_per_minute: env_u64_ranged("ENGRAM_SDK_REQUESTS_PER_MINUTE", 50, 1, 100_000)
                as u32,
            tokens_per_minute: env_u64_ranged("ENGRAM_SDK_TOKENS_PER_MINUTE", 30_000, 1, 10_000_000)
                as u32,
            max_queue_depth: env_u64_ranged("ENGRAM_SDK_MAX_QUEUE_DEPTH", 100, 1, 100_000) as usize,
            queue_timeout_seconds: env_f64_ranged("ENGRAM_SDK_QUEUE_TIMEOUT", 60.0, 0.1, 3600.0),
        };

        Self {
            similarity_threshold: env_f64_ranged("ENGRAM_SIMILARITY_THRESHOLD", 0.7, 0.0, 1.0)
                as f32,
            dedup_threshold: env_f64_ranged("ENGRAM_DEDUP_THRESHOLD", 0.95, 0.80, 0.99) as f32,
            max_retrievals: env_u64_ranged("ENGRAM_MAX_RETRIEVALS", 5, 1, 50) as usize,
            token_budget: env_u64_ranged("ENGRAM_TOKEN_BUDGET", 2000, 100, 100_000) as usize,
            qdrant_host: env_string("QDRANT_HOST").unwrap_or(defaults.qdrant_host),
            qdrant_port: env_u64_ranged("QDRANT_PORT", 6334, 1024, 65535) as u16,
            qdrant_api_key: env_string("QDRANT_API_KEY"),
            qdrant_use_tls: env_bool("QDRANT_USE_TLS").unwrap_or(false),
            qdrant_timeout_seconds: env_u64_ranged("QDRANT_TIMEOUT_SECONDS", 10, 1, 300),
            embedding_host: env_string("EMBEDDING_HOST").unwrap_or(defaults.embedding_host),
            embedding_port: env_u64_ranged("EMBEDDING_PORT", 28080, 1024, 65535) as u16,
            embedding_read_timeout: env_f64_ranged(
                "EMBEDDING_READ_TIMEOUT",
                DEFAULT_EMBEDDING_READ_TIMEOUT,
                0.1,
                300.0,
            ),
            log_level: env_string("ENGRAM_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: env_string("ENGRAM_LOG_FORMAT").unwrap_or(defaults.log_format),
            collection_size_warning: env_u64_ranged(
                "ENGRAM_COLLECTION_SIZE_WARNING",
                10_000,
                100,
                u64::MAX,
            ) as usize,
            collection_size_critical: env_u64_ranged(
                "ENGRAM_COLLECTION_SIZE_CRITICAL",
                50_000,
                1000,
                u64::MAX,
            ) as usize,
            install_dir: install_dir.clone(),
            queue_path,
            audit_dir: env_string("ENGRAM_AUDIT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.audit_dir),
            hnsw_ef_fast: env_u64_ranged("ENGRAM_HNSW_EF_FAST", 64, 4, 4096),
            hnsw_ef_accurate: env_u64_ranged("ENGRAM_HNSW_EF_ACCURATE", 128, 4, 4096),
            trace_enabled: env_bool("ENGRAM_TRACE_ENABLED").unwrap_or(false),
            trace_buffer_max_mb: env_u64_ranged("ENGRAM_TRACE_BUFFER_MAX_MB", 100, 1, 10_000),
            pushgateway_url: env_string("ENGRAM_PUSHGATEWAY_URL").unwrap_or(defaults.pushgateway_url),
            metrics_enabled: env_bool("ENGRAM_METRICS_ENABLED").unwrap_or(false),
            decay,
            classifier,
            freshness,
            rate_limit,
        }
    }

    /// Full URL for the vector store connection
    pub fn qdrant_url(&self) -> String {
        let scheme = if self.qdrant_use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.qdrant_host, self.qdrant_port)
    }

    /// Full URL for the embedding service
    pub fn embedding_url(&self) -> String {
        format!("http://{}:{}", self.embedding_host, self.embedding_port)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?.to_lowercase();
    match value.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a float env var, falling back to `default` (with a warning) when the
/// value is unparseable or outside `[min, max]`.
fn env_f64_ranged(name: &str, default: f64, min: f64, max: f64) -> f64 {
    let Some(raw) = env_string(name) else {
        return default;
    };
    match raw.parse::<f64>() {
        Ok(v) if v >= min && v <= max => v,
        Ok(v) => {
            warn!(key = name, value = v, min, max, "env var out of range, using default");
            default
        }
        Err(_) => {
            warn!(key = name, raw = %raw, "env var not a number, using default");
            default
        }
    }
}

/// Parse an integer env var, falling back to `default` (with a warning) when
/// the value is unparseable or outside `[min, max]`.
fn env_u64_ranged(name: &str, default: u64, min: u64, max: u64) -> u64 {
    let Some(raw) = env_string(name) else {
        return default;
    };
    match raw.parse::<u64>() {
        Ok(v) if v >= min && v <= max => v,
        Ok(v) => {
            warn!(key = name, value = v, min, max, "env var out of range, using default");
            default
        }
        Err(_) => {
            warn!(key = name, raw = %raw, "env var not an integer, using default");
            default
        }
    }
}

/// Parse "type:days,type:days" override syntax. Malformed entries are
/// skipped with a warning rather than failing the whole config.
fn parse_type_overrides(raw: Option<&str>) -> BTreeMap<String, f64> {
    let mut overrides = BTreeMap::new();
    let Some(raw) = raw else {
        return overrides;
    };
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((ty, days)) = entry.split_once(':') else {
            warn!(entry, "malformed decay override, expected type:days");
            continue;
        };
        match days.trim().parse::<f64>() {
            Ok(d) if d > 0.0 => {
                overrides.insert(ty.trim().to_string(), d);
            }
            _ => warn!(entry, "malformed decay override days value"),
        }
    }
    overrides
}
