// src/filters/conversation.rs
// Conversation noise filtering for context injection

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Default duplicate-detection window in minutes. A conversation turn is
/// typically 2-3 minutes; 5 catches immediate repeats without filtering
/// legitimate similar questions asked hours apart.
pub const DEFAULT_DUP_WINDOW_MINUTES: i64 = 5;

static MENU_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"\[MH\]", r"\[CH\]", r"\[PS\]", r"\[DA\]", r"\[CR\]", r"\[DS\]", r"\[PM\]"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

static TRUNCATED_DIAGRAM: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"[┌┐└┘├┤┬┴┼│─].*\.\.\.$").ok());

/// Remove UI-menu noise lines, separator rules and truncated ASCII-art
/// lines from conversation content before injection.
pub fn filter_low_value_content(content: &str) -> String {
    let mut filtered = Vec::new();

    'lines: for line in content.lines() {
        let trimmed = line.trim();

        // Menu separator rules
        if trimmed.starts_with('─') {
            continue;
        }

        for pattern in MENU_PATTERNS.iter() {
            if pattern.is_match(line) {
                continue 'lines;
            }
        }

        // Truncated ASCII diagram lines (box-drawing chars ending in ...)
        if let Some(diagram) = TRUNCATED_DIAGRAM.as_ref() {
            if diagram.is_match(trimmed) {
                continue;
            }
        }

        filtered.push(line);
    }

    filtered.join("\n")
}

/// Truncate at a sentence or word boundary, never mid-word.
///
/// Priority: fits as-is; last sentence boundary (`.`, `!`, `?`) before the
/// budget; last word boundary. The `...` marker counts against
/// `max_length`.
pub fn smart_truncate(content: &str, max_length: usize) -> String {
    if content.chars().count() <= max_length {
        return content.to_string();
    }
    if max_length <= 3 {
        return "...".chars().take(max_length).collect();
    }

    let target: String = content.chars().take(max_length - 3).collect();

    // Prefer the last sentence boundary within the budget
    let sentence_end = target
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .last();
    if let Some(end) = sentence_end {
        if end > 0 {
            return format!("{}...", &target[..end]);
        }
    }

    // No sentence boundary: cut at the last word boundary
    let cut = match target.rfind(' ') {
        Some(pos) if pos > 0 => &target[..pos],
        _ => target.as_str(),
    };
    format!("{}...", cut.trim_end())
}

/// A previously injected message used for duplicate suppression
#[derive(Debug, Clone)]
pub struct PreviousMessage {
    pub content: String,
    pub timestamp: String,
}

/// Exact-content duplicate detection within a time window.
///
/// Near-duplicates are intentionally not detected; fuzzy matching costs
/// latency for marginal benefit at conversation cadence. An unparseable
/// timestamp disables the check for that message.
pub fn is_duplicate_message(
    content: &str,
    timestamp: &str,
    previous: &[PreviousMessage],
    window_minutes: i64,
) -> bool {
    let Ok(current) = parse_timestamp(timestamp) else {
        return false;
    };

    for msg in previous {
        if msg.content != content {
            continue;
        }
        let Ok(msg_time) = parse_timestamp(&msg.timestamp) else {
            continue;
        };
        let diff_minutes = (current - msg_time).num_seconds().abs() / 60;
        if diff_minutes <= window_minutes {
            debug!(window_minutes, "duplicate message detected");
            return true;
        }
    }

    false
}

fn parse_timestamp(ts: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(&ts.replace('Z', "+00:00")).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_removes_menu_lines() {
        let content = "Real content\n[MH] Main Hub\n──────\nMore content";
        let filtered = filter_low_value_content(content);
        assert_eq!(filtered, "Real content\nMore content");
    }

    #[test]
    fn test_filter_removes_truncated_diagrams() {
        let content = "keep\n┌── box art ...\nalso keep";
        let filtered = filter_low_value_content(content);
        assert_eq!(filtered, "keep\nalso keep");
    }

    #[test]
    fn test_smart_truncate_fits() {
        assert_eq!(smart_truncate("short", 100), "short");
    }

    #[test]
    fn test_smart_truncate_sentence_boundary() {
        let text = "First sentence. Second sentence goes on and on and on.";
        let result = smart_truncate(text, 30);
        assert_eq!(result, "First sentence....");
        assert!(result.chars().count() <= 30);
    }

    #[test]
    fn test_smart_truncate_word_boundary() {
        let text = "no sentence boundaries here just words forever and ever";
        let result = smart_truncate(text, 25);
        assert!(result.ends_with("..."));
        assert!(result.chars().count() <= 25);
        // No word is cut in half: the prefix minus "..." must end at a word
        let prefix = result.trim_end_matches("...");
        assert!(text.starts_with(prefix));
        let next_char = text[prefix.len()..].chars().next();
        assert_eq!(next_char, Some(' '));
    }

    #[test]
    fn test_smart_truncate_never_exceeds_budget() {
        let text = "word ".repeat(100);
        for max in [5, 10, 17, 50, 400] {
            assert!(smart_truncate(&text, max).chars().count() <= max);
        }
    }

    #[test]
    fn test_duplicate_within_window() {
        let previous = vec![PreviousMessage {
            content: "hello".to_string(),
            timestamp: "2026-01-01T12:00:00Z".to_string(),
        }];
        assert!(is_duplicate_message(
            "hello",
            "2026-01-01T12:03:00Z",
            &previous,
            DEFAULT_DUP_WINDOW_MINUTES
        ));
    }

    #[test]
    fn test_duplicate_outside_window() {
        let previous = vec![PreviousMessage {
            content: "hello".to_string(),
            timestamp: "2026-01-01T12:00:00Z".to_string(),
        }];
        assert!(!is_duplicate_message(
            "hello",
            "2026-01-01T12:10:00Z",
            &previous,
            DEFAULT_DUP_WINDOW_MINUTES
        ));
    }

    #[test]
    fn test_different_content_not_duplicate() {
        let previous = vec![PreviousMessage {
            content: "hello".to_string(),
            timestamp: "2026-01-01T12:00:00Z".to_string(),
        }];
        assert!(!is_duplicate_message(
            "goodbye",
            "2026-01-01T12:01:00Z",
            &previous,
            DEFAULT_DUP_WINDOW_MINUTES
        ));
    }

    #[test]
    fn test_invalid_timestamp_disables_check() {
        let previous = vec![PreviousMessage {
            content: "hello".to_string(),
            timestamp: "2026-01-01T12:00:00Z".to_string(),
        }];
        assert!(!is_duplicate_message("hello", "not-a-time", &previous, 5));
    }
}
