// src/classifier/significance.rs
// Content significance gating - filters low-value content before the LLM

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Content shorter than this is never worth classifying
const MIN_CONTENT_LENGTH: usize = 10;

/// Significance level of a candidate memory.
/// SKIP is discarded outright, LOW skips classification, MEDIUM/HIGH are
/// classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Significance {
    Skip,
    Low,
    Medium,
    High,
}

impl Significance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Significance::Skip => "skip",
            Significance::Low => "low",
            Significance::Medium => "medium",
            Significance::High => "high",
        }
    }
}

/// Bare acknowledgments and emoji-only messages
static SKIP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^(ok(ay)?|yes|no|yep|nope|sure|done|thanks?|thank you|got it|cool|nice|great|lgtm)[.!]*$",
        r"^[\p{Emoji_Presentation}\s]+$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Simple conversational responses with little lasting value
static LOW_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^(sounds good|will do|on it|makes sense|agreed|understood)[.!]*$",
        r"(?i)^(let me|i'll|i will) (check|look|see)\b.{0,40}$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Indicators of content worth keeping regardless of length
static HIGH_VALUE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)DEC-\d+",
        r"(?i)BLK-\d+",
        r"(?i)\b(decided|chose|selected|opted for)\b",
        r"(?i)\b(error|exception|traceback|panic)\b",
        r"\b(MUST|NEVER|ALWAYS|REQUIRED|SHALL NOT)\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Check the significance level of content.
pub fn check_significance(content: &str) -> Significance {
    let stripped = content.trim();

    if stripped.chars().count() < MIN_CONTENT_LENGTH {
        debug!(length = stripped.len(), "content too short");
        return Significance::Skip;
    }

    for pattern in SKIP_PATTERNS.iter() {
        if pattern.is_match(stripped) {
            return Significance::Skip;
        }
    }

    for pattern in LOW_PATTERNS.iter() {
        if pattern.is_match(stripped) {
            return Significance::Low;
        }
    }

    for pattern in HIGH_VALUE_PATTERNS.iter() {
        if pattern.is_match(content) {
            return Significance::High;
        }
    }

    Significance::Medium
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_content_skipped() {
        assert_eq!(check_significance("ok"), Significance::Skip);
        assert_eq!(check_significance(""), Significance::Skip);
    }

    #[test]
    fn test_acknowledgment_skipped() {
        assert_eq!(check_significance("sounds good!"), Significance::Low);
        assert_eq!(check_significance("thank you!!"), Significance::Skip);
    }

    #[test]
    fn test_decision_is_high() {
        assert_eq!(
            check_significance("After discussing options, we decided to use PostgreSQL"),
            Significance::High
        );
    }

    #[test]
    fn test_error_is_high() {
        assert_eq!(
            check_significance("Got a panic in the worker loop when the channel closes"),
            Significance::High
        );
    }

    #[test]
    fn test_default_is_medium() {
        assert_eq!(
            check_significance("The cache layer now stores compressed entries"),
            Significance::Medium
        );
    }
}
