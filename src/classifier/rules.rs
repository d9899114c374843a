// src/classifier/rules.rs
// Rule-based classification - high-confidence regex patterns, no LLM cost

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

/// One rule: target type, static confidence, patterns tried in order
struct Rule {
    memory_type: &'static str,
    confidence: f64,
    patterns: Vec<Regex>,
}

fn rule(memory_type: &'static str, confidence: f64, patterns: &[&str]) -> Rule {
    Rule {
        memory_type,
        confidence,
        patterns: patterns.iter().filter_map(|p| Regex::new(p).ok()).collect(),
    }
}

/// Ordered rules. Earlier rules win, so the most specific markers
/// (ports, decision ids) come before broad keyword rules.
static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule("port", 0.95, &[r"(?i)\bport\s+\d{2,5}\b"]),
        rule("decision", 0.95, &[r"DEC-\d+"]),
        rule(
            "error_fix",
            0.90,
            &[
                r"(?i)\bfix(ed|es)?\b.*\b\w*(error|exception|panic)\b",
                r"(?i)\b\w*(error|exception|panic)\b.*\b(fix(ed|es)?|resolv(ed|es)?|solution)\b",
            ],
        ),
        rule("rule", 0.90, &[r"\b(MUST|NEVER|ALWAYS|REQUIRED|SHALL NOT)\b"]),
        rule(
            "blocker",
            0.90,
            &[r"BLK-\d+", r"(?i)\bblocked\s+(by|on)\b", r"(?i)\bwaiting\s+on\s+external\b"],
        ),
        rule(
            "decision",
            0.85,
            &[r"(?i)\b(decided|chose|selected|opted for)\b"],
        ),
        rule(
            "naming",
            0.85,
            &[r"(?i)naming convention", r"\b(snake_case|camelCase|PascalCase|kebab-case)\b"],
        ),
    ]
});

/// Classify content using rule patterns.
///
/// Returns `(type, confidence)` for the first match whose confidence meets
/// `rule_confidence_threshold`, otherwise `None`.
pub fn classify_by_rules(content: &str, rule_confidence_threshold: f64) -> Option<(String, f64)> {
    if content.is_empty() {
        return None;
    }

    for rule in RULES.iter() {
        for pattern in &rule.patterns {
            if pattern.is_match(content) {
                if rule.confidence >= rule_confidence_threshold {
                    info!(
                        memory_type = rule.memory_type,
                        confidence = rule.confidence,
                        "rule match"
                    );
                    return Some((rule.memory_type.to_string(), rule.confidence));
                }
                debug!(
                    memory_type = rule.memory_type,
                    confidence = rule.confidence,
                    "rule match below threshold"
                );
            }
        }
    }

    debug!("no rule match");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f64 = 0.85;

    #[test]
    fn test_error_fix_pattern() {
        let result = classify_by_rules("Fixed TypeError by adding null check", THRESHOLD);
        assert_eq!(result, Some(("error_fix".to_string(), 0.90)));
    }

    #[test]
    fn test_port_pattern() {
        let result = classify_by_rules("Port 26350 for the vector store", THRESHOLD);
        assert_eq!(result, Some(("port".to_string(), 0.95)));
    }

    #[test]
    fn test_rule_pattern() {
        let result = classify_by_rules("MUST use snake_case for module names", THRESHOLD);
        assert_eq!(result, Some(("rule".to_string(), 0.90)));
    }

    #[test]
    fn test_decision_reference() {
        let result = classify_by_rules("DEC-031 decided to use PostgreSQL", THRESHOLD);
        assert_eq!(result, Some(("decision".to_string(), 0.95)));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(classify_by_rules("just some ordinary text", THRESHOLD), None);
    }

    #[test]
    fn test_threshold_filters_low_confidence() {
        // naming is 0.85; a 0.9 threshold suppresses it
        let result = classify_by_rules("we use camelCase everywhere", 0.9);
        assert_eq!(result, None);
        let result = classify_by_rules("we use camelCase everywhere", 0.85);
        assert_eq!(result, Some(("naming".to_string(), 0.85)));
    }
}
