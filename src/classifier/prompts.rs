// src/classifier/prompts.rs
// Classification prompt template

/// Fixed classification prompt. Describes the closed type set per
/// collection, the tie-break rules, and the strict JSON response schema.
const CLASSIFICATION_PROMPT: &str = r#"You are a memory classifier for a software development AI assistant.

Classify this memory into EXACTLY ONE type based on its content.

## MEMORY TYPES

### code-patterns collection (HOW things are built):
- **implementation**: How a feature was built, code patterns, architecture
- **error_fix**: An error/exception encountered AND its solution
- **refactor**: Code restructuring, renaming, moving, extracting
- **file_pattern**: File-specific conventions or patterns

### conventions collection (WHAT rules to follow):
- **rule**: Hard rules using MUST/NEVER/ALWAYS/REQUIRED
- **guideline**: Soft recommendations, best practices, suggestions
- **port**: Port number configurations or assignments
- **naming**: Naming conventions for files, functions, variables
- **structure**: Folder structure or file organization conventions

### discussions collection (WHY things were decided):
- **decision**: Architectural choices, technology selections, approach decisions
- **session_summary**: Session summaries (handled separately - don't classify as this)
- **blocker**: Something blocking progress, waiting on external
- **preference**: User preferences, personal choices about workflow

### Default types (only if nothing else fits):
- **user_message**: Raw user input with no special classification
- **agent_response**: Raw agent output with no special classification

## CLASSIFICATION RULES
1. Choose the MOST SPECIFIC type that applies
2. "decision" requires an actual choice was made, not just discussion
3. "error_fix" requires BOTH the error AND its fix
4. "rule" requires strong language (MUST/NEVER), otherwise use "guideline"
5. If unsure between types, prefer the default (user_message/agent_response)

## CONTENT TO CLASSIFY
Collection: {collection}
Current Type: {current_type}{file_path_line}

Content:
---
{content}
---

## RESPONSE FORMAT
Respond with valid JSON only, no markdown:
{
  "classified_type": "<type from list above>",
  "confidence": <0.0-1.0>,
  "reasoning": "<brief 1-sentence explanation>",
  "tags": ["<relevant>", "<tags>"],
  "is_significant": <true if valuable for future sessions, false otherwise>
}"#;

/// Build the classification prompt, truncating content to the configured
/// input budget.
pub fn build_classification_prompt(
    content: &str,
    collection: &str,
    current_type: &str,
    file_path: Option<&str>,
    max_input_chars: usize,
) -> String {
    let truncated: String = if content.chars().count() > max_input_chars {
        let kept: String = content.chars().take(max_input_chars).collect();
        format!("{kept}\n\n[...truncated]")
    } else {
        content.to_string()
    };

    let file_path_line = file_path
        .map(|p| format!("\nFile Path: {p}"))
        .unwrap_or_default();

    CLASSIFICATION_PROMPT
        .replace("{collection}", collection)
        .replace("{current_type}", current_type)
        .replace("{file_path_line}", &file_path_line)
        .replace("{content}", &truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_includes_content_and_context() {
        let prompt =
            build_classification_prompt("some content", "conventions", "guideline", None, 4000);
        assert!(prompt.contains("Collection: conventions"));
        assert!(prompt.contains("Current Type: guideline"));
        assert!(prompt.contains("some content"));
        assert!(!prompt.contains("File Path:"));
    }

    #[test]
    fn test_prompt_file_path_line() {
        let prompt = build_classification_prompt(
            "content here",
            "code-patterns",
            "implementation",
            Some("src/app.rs"),
            4000,
        );
        assert!(prompt.contains("File Path: src/app.rs"));
    }

    #[test]
    fn test_prompt_truncates_long_content() {
        let long = "x".repeat(10_000);
        let prompt =
            build_classification_prompt(&long, "discussions", "user_message", None, 100);
        assert!(prompt.contains("[...truncated]"));
        assert!(!prompt.contains(&"x".repeat(200)));
    }
}
