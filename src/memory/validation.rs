// src/memory/validation.rs
// Payload validation and content hashing

use super::model::{MemoryType, SourceHook};
use sha2::{Digest, Sha256};

/// Minimum content length in characters
pub const MIN_CONTENT_LEN: usize = 10;

/// Maximum content length in characters
pub const MAX_CONTENT_LEN: usize = 100_000;

/// Validate a raw memory payload, returning all validation errors at once.
///
/// Works on the JSON form rather than the typed struct so hook input and
/// retry-queue entries can be validated before deserialization commits to
/// a shape. An empty vec means the payload is valid.
pub fn validate_payload(payload: &serde_json::Value) -> Vec<String> {
    let mut errors = Vec::new();

    for field in ["content", "group_id", "type", "source_hook"] {
        let present = payload
            .get(field)
            .and_then(|v| v.as_str())
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if !present {
            errors.push(format!("Missing required field: {field}"));
        }
    }

    if let Some(content) = payload.get("content").and_then(|v| v.as_str()) {
        let len = content.chars().count();
        if len > MAX_CONTENT_LEN {
            errors.push("Content exceeds maximum length (100,000 chars)".to_string());
        }
        if len < MIN_CONTENT_LEN {
            errors.push("Content too short (minimum 10 chars)".to_string());
        }
    }

    if let Some(ty) = payload.get("type").and_then(|v| v.as_str()) {
        if !ty.is_empty() && MemoryType::parse(ty).is_none() {
            errors.push(format!(
                "Invalid type '{ty}'. Must be one of the closed memory type set"
            ));
        }
    }

    if let Some(hook) = payload.get("source_hook").and_then(|v| v.as_str()) {
        if !hook.is_empty() && SourceHook::parse(hook).is_none() {
            errors.push(format!(
                "Invalid source_hook '{hook}'. Must be one of the capture entry points"
            ));
        }
    }

    errors
}

/// SHA-256 hash of the content for deduplication.
///
/// Hashes the raw UTF-8 bytes with no normalization so unicode, newlines
/// and control characters all contribute. Returns a 64-char lowercase hex
/// string.
pub fn compute_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_payload_has_no_errors() {
        let payload = json!({
            "content": "def foo(): return 1",
            "group_id": "proj",
            "type": "implementation",
            "source_hook": "PostToolUse",
        });
        assert!(validate_payload(&payload).is_empty());
    }

    #[test]
    fn test_missing_fields_all_reported() {
        let errors = validate_payload(&json!({}));
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().all(|e| e.starts_with("Missing required field")));
    }

    #[test]
    fn test_content_too_short() {
        let payload = json!({
            "content": "short",
            "group_id": "proj",
            "type": "implementation",
            "source_hook": "PostToolUse",
        });
        let errors = validate_payload(&payload);
        assert!(errors.iter().any(|e| e.contains("too short")));
    }

    #[test]
    fn test_content_too_long() {
        let payload = json!({
            "content": "x".repeat(MAX_CONTENT_LEN + 1),
            "group_id": "proj",
            "type": "implementation",
            "source_hook": "PostToolUse",
        });
        let errors = validate_payload(&payload);
        assert!(errors.iter().any(|e| e.contains("maximum length")));
    }

    #[test]
    fn test_invalid_type_and_hook() {
        let payload = json!({
            "content": "long enough content",
            "group_id": "proj",
            "type": "nonsense",
            "source_hook": "NotAHook",
        });
        let errors = validate_payload(&payload);
        assert!(errors.iter().any(|e| e.contains("Invalid type")));
        assert!(errors.iter().any(|e| e.contains("Invalid source_hook")));
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = compute_content_hash("hello world");
        let b = compute_content_hash("hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_known_vector() {
        // SHA-256 of "abc"
        assert_eq!(
            compute_content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_is_byte_faithful() {
        // No normalization: different unicode forms hash differently
        let composed = "caf\u{e9}";
        let decomposed = "cafe\u{301}";
        assert_ne!(compute_content_hash(composed), compute_content_hash(decomposed));
        // Control characters and newlines contribute
        assert_ne!(compute_content_hash("a\nb"), compute_content_hash("a b"));
    }
}
