// src/classifier/mod.rs
// Memory classification - rules first, then an LLM provider chain with
// circuit breaking and per-provider rate limiting.

pub mod circuit_breaker;
pub mod prompts;
pub mod providers;
pub mod rate_limiter;
pub mod rules;
pub mod significance;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limiter::ProviderRateLimiter;
pub use significance::{check_significance, Significance};

use crate::config::{ClassifierConfig, MemoryConfig};
use crate::memory::{Collection, MemoryType};
use once_cell::sync::Lazy;
use providers::{
    ClaudeProvider, ClassifierProvider, OllamaProvider, OpenAiProvider, OpenRouterProvider,
};
use rules::classify_by_rules;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Process-wide circuit breaker shared by all classification requests
static CIRCUIT_BREAKER: Lazy<CircuitBreaker> = Lazy::new(CircuitBreaker::default);

/// Process-wide per-provider rate limiter
static RATE_LIMITER: Lazy<ProviderRateLimiter> = Lazy::new(ProviderRateLimiter::default);

/// Provider chain cache, guarded by a hash of the chain configuration so
/// config changes rebuild it.
type ProviderChain = Arc<Vec<Arc<dyn ClassifierProvider>>>;
static PROVIDER_CHAIN: Lazy<Mutex<Option<(u64, ProviderChain)>>> = Lazy::new(|| Mutex::new(None));

/// Result of memory classification
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub original_type: MemoryType,
    pub classified_type: MemoryType,
    pub confidence: f64,
    pub reasoning: String,
    pub tags: Vec<String>,
    /// Provider name, or one of the pseudo-providers "disabled",
    /// "significance-filter", "protected-type", "rule-based", "none",
    /// "fallback"
    pub provider_used: String,
    pub was_reclassified: bool,
    pub model_name: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl ClassificationResult {
    fn unchanged(current_type: MemoryType, provider: &str, reasoning: String) -> Self {
        Self {
            original_type: current_type,
            classified_type: current_type,
            confidence: 1.0,
            reasoning,
            tags: Vec::new(),
            provider_used: provider.to_string(),
            was_reclassified: false,
            model_name: String::new(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// Classify content, preferring rules over LLM calls.
///
/// Never fails: when the classifier is disabled, the content is
/// insignificant, the type is protected, or every provider fails, the
/// original type comes back with `was_reclassified = false`.
pub async fn classify(
    config: &MemoryConfig,
    content: &str,
    collection: Collection,
    current_type: MemoryType,
) -> ClassificationResult {
    if !config.classifier.enabled {
        debug!("classifier disabled");
        return ClassificationResult::unchanged(
            current_type,
            "disabled",
            "Classification disabled".to_string(),
        );
    }

    let significance = check_significance(content);
    if matches!(significance, Significance::Skip | Significance::Low) {
        debug!(significance = significance.as_str(), "classification skipped");
        return ClassificationResult::unchanged(
            current_type,
            "significance-filter",
            format!("Skipped due to {} significance", significance.as_str()),
        );
    }

    if current_type.is_protected() {
        debug!(memory_type = %current_type, "type protected from reclassification");
        return ClassificationResult::unchanged(
            current_type,
            "protected-type",
            format!("Type '{current_type}' is protected from reclassification"),
        );
    }

    if let Some((rule_type, confidence)) =
        classify_by_rules(content, config.classifier.rule_confidence_threshold)
    {
        // Rule types come from the closed set by construction
        let classified = MemoryType::parse(&rule_type).unwrap_or(current_type);
        let was_reclassified = classified != current_type;
        info!(
            original_type = %current_type,
            classified_type = %classified,
            confidence,
            was_reclassified,
            "rule-based classification"
        );
        return ClassificationResult {
            original_type: current_type,
            classified_type: classified,
            confidence,
            reasoning: "Matched rule-based pattern".to_string(),
            tags: Vec::new(),
            provider_used: "rule-based".to_string(),
            was_reclassified,
            model_name: String::new(),
            input_tokens: 0,
            output_tokens: 0,
        };
    }

    classify_with_llm(config, content, collection, current_type).await
}

async fn classify_with_llm(
    config: &MemoryConfig,
    content: &str,
    collection: Collection,
    current_type: MemoryType,
) -> ClassificationResult {
    let providers = provider_chain(&config.classifier);
    if providers.is_empty() {
        warn!("no classification providers available");
        return ClassificationResult::unchanged(
            current_type,
            "none",
            "No LLM providers available".to_string(),
        );
    }

    let mut last_error: Option<String> = None;

    for provider in providers.iter() {
        let name = provider.name();

        if !CIRCUIT_BREAKER.is_available(name) {
            debug!(provider = name, "provider circuit open, falling through");
            continue;
        }

        // A denied rate limit is an immediate fallback trigger, not a wait
        if !RATE_LIMITER.allow_request(name) {
            debug!(provider = name, "provider rate limited, falling through");
            continue;
        }

        if !provider.is_available().await {
            debug!(provider = name, "provider unavailable");
            CIRCUIT_BREAKER.record_failure(name, "unavailable");
            continue;
        }

        info!(provider = name, "attempting classification");
        let start = Instant::now();

        match provider
            .classify(content, collection.as_str(), current_type.as_str())
            .await
        {
            Ok(response) => {
                let validated =
                    validate_classification(&response.classified_type, collection, current_type);

                if response.confidence >= config.classifier.confidence_threshold {
                    CIRCUIT_BREAKER.record_success(name);
                    crate::metrics::push_classification(
                        config,
                        name,
                        true,
                        start.elapsed().as_secs_f64(),
                    );
                    let was_reclassified = validated != current_type;
                    info!(
                        provider = name,
                        original_type = %current_type,
                        classified_type = %validated,
                        confidence = response.confidence,
                        was_reclassified,
                        latency_seconds = start.elapsed().as_secs_f64(),
                        "llm classification success"
                    );
                    return ClassificationResult {
                        original_type: current_type,
                        classified_type: validated,
                        confidence: response.confidence,
                        reasoning: response.reasoning,
                        tags: response.tags,
                        provider_used: name.to_string(),
                        was_reclassified,
                        model_name: response.model_name,
                        input_tokens: response.input_tokens,
                        output_tokens: response.output_tokens,
                    };
                }

                // A parseable but unconvincing answer is still a healthy
                // provider
                CIRCUIT_BREAKER.record_success(name);
                debug!(
                    provider = name,
                    confidence = response.confidence,
                    threshold = config.classifier.confidence_threshold,
                    "confidence below threshold"
                );
            }
            Err(e) => {
                CIRCUIT_BREAKER.record_failure(name, "error");
                crate::metrics::push_classification(config, name, false, start.elapsed().as_secs_f64());
                warn!(provider = name, error = %e, "provider failed");
                last_error = Some(e.to_string());
            }
        }
    }

    warn!(last_error = ?last_error, "all providers failed");
    ClassificationResult::unchanged(
        current_type,
        "fallback",
        "All providers failed, kept original type".to_string(),
    )
}

/// Validate an LLM-returned type against the target collection's set.
///
/// A type that belongs to a different collection is a cross-collection
/// answer the pipeline cannot honor; entirely unknown types are rejected
/// the same way. Both keep the original type.
fn validate_classification(
    classified: &str,
    collection: Collection,
    original: MemoryType,
) -> MemoryType {
    match MemoryType::parse(classified) {
        Some(ty) if collection.valid_types().contains(&ty) => ty,
        Some(ty) => {
            warn!(
                classified_type = %ty,
                collection = %collection,
                keeping_original = %original,
                "type valid for another collection"
            );
            original
        }
        None => {
            warn!(
                classified_type = classified,
                collection = %collection,
                keeping_original = %original,
                "invalid classified type"
            );
            original
        }
    }
}

/// Get the cached provider chain, rebuilding when the configured chain
/// changes.
fn provider_chain(config: &ClassifierConfig) -> ProviderChain {
    let hash = chain_config_hash(config);

    let Ok(mut cache) = PROVIDER_CHAIN.lock() else {
        return build_provider_chain(config);
    };
    if let Some((cached_hash, chain)) = cache.as_ref() {
        if *cached_hash == hash {
            debug!("using cached provider chain");
            return chain.clone();
        }
    }

    info!(
        primary = %config.primary_provider,
        fallbacks = ?config.fallback_providers,
        "building provider chain"
    );
    let chain = build_provider_chain(config);
    *cache = Some((hash, chain.clone()));
    chain
}

fn chain_config_hash(config: &ClassifierConfig) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    config.primary_provider.hash(&mut hasher);
    config.fallback_providers.hash(&mut hasher);
    hasher.finish()
}

fn build_provider_chain(config: &ClassifierConfig) -> ProviderChain {
    let mut chain: Vec<Arc<dyn ClassifierProvider>> = Vec::new();

    let mut add = |name: &str| {
        let provider: Option<Arc<dyn ClassifierProvider>> = match name {
            "ollama" => Some(Arc::new(OllamaProvider::new(config))),
            "openrouter" => Some(Arc::new(OpenRouterProvider::new(config))),
            "claude" => Some(Arc::new(ClaudeProvider::new(config))),
            "openai" => Some(Arc::new(OpenAiProvider::new(config))),
            other => {
                warn!(provider = other, "unknown provider name skipped");
                None
            }
        };
        if let Some(provider) = provider {
            chain.push(provider);
        }
    };

    add(&config.primary_provider);
    for name in &config.fallback_providers {
        if name != &config.primary_provider {
            add(name);
        }
    }

    Arc::new(chain)
}
