// src/search/decay.rs
// Server-evaluated hybrid scoring: semantic similarity fused with
// per-type exponential time decay on stored_at.
//
//   final = w_sem * $score
//         + (1 - w_sem) * sum(type_condition_i * exp_decay(stored_at, scale_i))
//
// Each condition evaluates to 1.0 or 0.0; exactly one branch activates
// per candidate. The decay term is 0.5 ^ (age / half_life), so a memory
// at exactly its half-life contributes half the temporal weight.

use crate::config::MemoryConfig;
use crate::memory::Collection;
use chrono::{DateTime, Utc};
use qdrant_client::qdrant::{
    condition::ConditionOneOf, r#match::MatchValue, Condition, DecayParamsExpressionBuilder,
    Expression, FieldCondition, Formula, Match, RepeatedStrings,
};
use std::collections::{BTreeMap, HashMap};

/// Fallback stored_at for points missing the field: old enough that the
/// temporal component is effectively zero while the semantic component
/// still counts.
const MISSING_STORED_AT_DEFAULT: &str = "2020-01-01T00:00:00Z";

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Temporal score midpoint: the decay curve passes 0.5 at one half-life
const DECAY_MIDPOINT: f32 = 0.5;

/// Resolve the half-life in days for a type within a collection.
///
/// Order: type override, collection default, global default (21 days).
pub fn resolve_half_life(content_type: &str, collection: Collection, config: &MemoryConfig) -> f64 {
    if let Some(days) = config.decay.type_overrides.get(content_type) {
        return *days;
    }
    match collection {
        Collection::CodePatterns => config.decay.half_life_code_patterns,
        Collection::Discussions => config.decay.half_life_discussions,
        Collection::Conventions => config.decay.half_life_conventions,
        Collection::JiraData => config.decay.half_life_jira_data,
    }
}

/// Half-life in seconds, for the decay scale parameter.
pub fn resolve_half_life_seconds(
    content_type: &str,
    collection: Collection,
    config: &MemoryConfig,
) -> u64 {
    (resolve_half_life(content_type, collection, config) * SECONDS_PER_DAY) as u64
}

/// Build the rescoring formula for a collection, or `None` when decay is
/// disabled (callers then run a vanilla semantic query).
///
/// Type overrides with equal half-life are grouped into a single branch
/// gated on `type IN {...}`; a catch-all branch matches `type NOT IN
/// {overrides}` at the collection default. With no overrides the formula
/// degrades to a single unconditional decay branch. Points with no `type`
/// field match neither branch and keep only the semantic component.
pub fn build_decay_formula(
    collection: Collection,
    config: &MemoryConfig,
    now: DateTime<Utc>,
) -> Option<Formula> {
    if !config.decay.enabled {
        return None;
    }

    let now_iso = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();

    // Group type overrides by resolved half-life in seconds
    let mut half_life_groups: BTreeMap<u64, Vec<String>> = BTreeMap::new();
    let mut all_override_types: Vec<String> = Vec::new();
    for (content_type, days) in &config.decay.type_overrides {
        let seconds = (days * SECONDS_PER_DAY) as u64;
        half_life_groups
            .entry(seconds)
            .or_default()
            .push(content_type.clone());
        all_override_types.push(content_type.clone());
    }

    let mut branches: Vec<Expression> = Vec::new();

    for (seconds, types) in &half_life_groups {
        branches.push(Expression::mult_with(vec![
            Expression::condition(Condition::matches("type", types.clone())),
            decay_term(&now_iso, *seconds as f32),
        ]));
    }

    let default_seconds = (resolve_half_life("__catchall__", collection, config)
        * SECONDS_PER_DAY) as f32;

    if all_override_types.is_empty() {
        // No overrides: one unconditional branch at the collection default
        branches.push(decay_term(&now_iso, default_seconds));
    } else {
        branches.push(Expression::mult_with(vec![
            Expression::condition(type_not_in(all_override_types)),
            decay_term(&now_iso, default_seconds),
        ]));
    }

    let semantic_weight = config.decay.semantic_weight;
    let temporal_weight = 1.0 - semantic_weight;

    let expression = Expression::sum_with(vec![
        Expression::mult_with(vec![Expression::constant(semantic_weight), Expression::score()]),
        Expression::mult_with(vec![
            Expression::constant(temporal_weight),
            Expression::sum_with(branches),
        ]),
    ]);

    Some(Formula {
        expression: Some(expression),
        defaults: HashMap::from([(
            "stored_at".to_string(),
            MISSING_STORED_AT_DEFAULT.into(),
        )]),
    })
}

fn decay_term(now_iso: &str, scale_seconds: f32) -> Expression {
    Expression::exp_decay(
        DecayParamsExpressionBuilder::new(Expression::datetime_key("stored_at"))
            .target(Expression::datetime(now_iso))
            .scale(scale_seconds)
            .midpoint(DECAY_MIDPOINT)
            .build(),
    )
}

/// `type NOT IN {values}` keyword condition for the catch-all branch.
fn type_not_in(values: Vec<String>) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: "type".to_string(),
            r#match: Some(Match {
                match_value: Some(MatchValue::ExceptKeywords(RepeatedStrings { strings: values })),
            }),
            ..Default::default()
        })),
    }
}

/// Pure decay math for tests and offline analysis. Query-time decay is
/// evaluated server-side; this mirrors that computation.
pub fn compute_decay_score(
    stored_at: DateTime<Utc>,
    half_life_days: f64,
    now: DateTime<Utc>,
    semantic_weight: f64,
    semantic_score: f64,
) -> f64 {
    let age_days = ((now - stored_at).num_seconds() as f64 / SECONDS_PER_DAY).max(0.0);
    let temporal = 0.5_f64.powf(age_days / half_life_days);
    semantic_weight * semantic_score + (1.0 - semantic_weight) * temporal
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn config_with_overrides(overrides: &[(&str, f64)]) -> MemoryConfig {
        let mut config = MemoryConfig::default();
        for (ty, days) in overrides {
            config.decay.type_overrides.insert(ty.to_string(), *days);
        }
        config
    }

    #[test]
    fn test_resolve_half_life_hierarchy() {
        let config = config_with_overrides(&[("error_fix", 7.0)]);
        // Type override wins
        assert_eq!(resolve_half_life("error_fix", Collection::CodePatterns, &config), 7.0);
        // Collection defaults
        assert_eq!(
            resolve_half_life("implementation", Collection::CodePatterns, &config),
            14.0
        );
        assert_eq!(resolve_half_life("rule", Collection::Conventions, &config), 60.0);
        assert_eq!(resolve_half_life("decision", Collection::Discussions, &config), 21.0);
        assert_eq!(resolve_half_life("jira_issue", Collection::JiraData, &config), 30.0);
    }

    #[test]
    fn test_half_life_seconds() {
        let config = MemoryConfig::default();
        assert_eq!(
            resolve_half_life_seconds("x", Collection::CodePatterns, &config),
            14 * 86_400
        );
    }

    #[test]
    fn test_global_default_half_life() {
        assert_eq!(crate::config::DEFAULT_HALF_LIFE_DAYS, 21.0);
    }

    #[test]
    fn test_disabled_decay_returns_none() {
        let mut config = MemoryConfig::default();
        config.decay.enabled = false;
        assert!(build_decay_formula(Collection::CodePatterns, &config, Utc::now()).is_none());
    }

    #[test]
    fn test_enabled_decay_returns_formula() {
        let config = MemoryConfig::default();
        let formula = build_decay_formula(Collection::CodePatterns, &config, Utc::now());
        assert!(formula.is_some());
    }

    #[test]
    fn test_compute_decay_score_at_half_life() {
        let now = Utc::now();
        let stored = now - Duration::days(14);
        let score = compute_decay_score(stored, 14.0, now, 0.7, 1.0);
        // 0.7 * 1.0 + 0.3 * 0.5 = 0.85
        assert!((score - 0.85).abs() < 0.001);
    }

    #[test]
    fn test_compute_decay_score_fresh() {
        let now = Utc::now();
        let score = compute_decay_score(now, 14.0, now, 0.7, 1.0);
        // Fresh memory: temporal component at full weight
        assert!((score - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_compute_decay_score_ancient() {
        let now = Utc::now();
        let stored = now - Duration::days(1400);
        let score = compute_decay_score(stored, 14.0, now, 0.7, 1.0);
        // 100 half-lives: temporal ~ 0, only semantic remains
        assert!((score - 0.7).abs() < 0.001);
    }

    #[test]
    fn test_future_stored_at_clamps_to_now() {
        let now = Utc::now();
        let future = now + Duration::days(10);
        let score = compute_decay_score(future, 14.0, now, 0.7, 1.0);
        assert!((score - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_equal_half_life_overrides_group() {
        let config = config_with_overrides(&[("error_fix", 7.0), ("refactor", 7.0), ("rule", 90.0)]);
        let mut groups: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        for (ty, days) in &config.decay.type_overrides {
            groups
                .entry((days * SECONDS_PER_DAY) as u64)
                .or_default()
                .push(ty.clone());
        }
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.get(&(7 * 86_400)).map(|v| v.len()), Some(2));
    }
}
