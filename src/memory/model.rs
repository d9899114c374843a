// src/memory/model.rs
// Payload schema for memories stored in the vector store

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of memory types. Each type belongs to exactly one collection
/// (see [`Collection::valid_types`]); user_message/agent_response are the
/// defaults when nothing more specific fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Implementation,
    ErrorFix,
    Refactor,
    FilePattern,
    Rule,
    Guideline,
    Port,
    Naming,
    Structure,
    Decision,
    SessionSummary,
    Blocker,
    Preference,
    UserMessage,
    AgentResponse,
    JiraIssue,
    GithubCommit,
    GithubCodeBlob,
}

impl MemoryType {
    pub const ALL: &'static [MemoryType] = &[
        MemoryType::Implementation,
        MemoryType::ErrorFix,
        MemoryType::Refactor,
        MemoryType::FilePattern,
        MemoryType::Rule,
        MemoryType::Guideline,
        MemoryType::Port,
        MemoryType::Naming,
        MemoryType::Structure,
        MemoryType::Decision,
        MemoryType::SessionSummary,
        MemoryType::Blocker,
        MemoryType::Preference,
        MemoryType::UserMessage,
        MemoryType::AgentResponse,
        MemoryType::JiraIssue,
        MemoryType::GithubCommit,
        MemoryType::GithubCodeBlob,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Implementation => "implementation",
            MemoryType::ErrorFix => "error_fix",
            MemoryType::Refactor => "refactor",
            MemoryType::FilePattern => "file_pattern",
            MemoryType::Rule => "rule",
            MemoryType::Guideline => "guideline",
            MemoryType::Port => "port",
            MemoryType::Naming => "naming",
            MemoryType::Structure => "structure",
            MemoryType::Decision => "decision",
            MemoryType::SessionSummary => "session_summary",
            MemoryType::Blocker => "blocker",
            MemoryType::Preference => "preference",
            MemoryType::UserMessage => "user_message",
            MemoryType::AgentResponse => "agent_response",
            MemoryType::JiraIssue => "jira_issue",
            MemoryType::GithubCommit => "github_commit",
            MemoryType::GithubCodeBlob => "github_code_blob",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        MemoryType::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Types the classifier must never rewrite
    pub fn is_protected(&self) -> bool {
        matches!(self, MemoryType::SessionSummary | MemoryType::ErrorFix)
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capture entry points. The string forms match the host assistant's hook
/// names plus a few internal origins (seed script, connectors, SDK wrapper).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceHook {
    #[serde(rename = "PostToolUse")]
    PostToolUse,
    #[serde(rename = "Stop")]
    Stop,
    #[serde(rename = "SessionStart")]
    SessionStart,
    #[serde(rename = "UserPromptSubmit")]
    UserPromptSubmit,
    #[serde(rename = "PreCompact")]
    PreCompact,
    #[serde(rename = "PreToolUse")]
    PreToolUse,
    #[serde(rename = "seed_script")]
    SeedScript,
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "jira_sync")]
    JiraSync,
    #[serde(rename = "github_sync")]
    GithubSync,
    #[serde(rename = "github_code_sync")]
    GithubCodeSync,
    #[serde(rename = "SDKWrapper")]
    SdkWrapper,
    #[serde(rename = "agent:subagent")]
    Subagent,
}

impl SourceHook {
    pub const ALL: &'static [SourceHook] = &[
        SourceHook::PostToolUse,
        SourceHook::Stop,
        SourceHook::SessionStart,
        SourceHook::UserPromptSubmit,
        SourceHook::PreCompact,
        SourceHook::PreToolUse,
        SourceHook::SeedScript,
        SourceHook::Manual,
        SourceHook::JiraSync,
        SourceHook::GithubSync,
        SourceHook::GithubCodeSync,
        SourceHook::SdkWrapper,
        SourceHook::Subagent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceHook::PostToolUse => "PostToolUse",
            SourceHook::Stop => "Stop",
            SourceHook::SessionStart => "SessionStart",
            SourceHook::UserPromptSubmit => "UserPromptSubmit",
            SourceHook::PreCompact => "PreCompact",
            SourceHook::PreToolUse => "PreToolUse",
            SourceHook::SeedScript => "seed_script",
            SourceHook::Manual => "manual",
            SourceHook::JiraSync => "jira_sync",
            SourceHook::GithubSync => "github_sync",
            SourceHook::GithubCodeSync => "github_code_sync",
            SourceHook::SdkWrapper => "SDKWrapper",
            SourceHook::Subagent => "agent:subagent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        SourceHook::ALL.iter().copied().find(|h| h.as_str() == s)
    }
}

impl fmt::Display for SourceHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of embedding generation for a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    #[default]
    Complete,
    Pending,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Complete => "complete",
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Failed => "failed",
        }
    }
}

/// The four fixed vector collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    #[serde(rename = "code-patterns")]
    CodePatterns,
    #[serde(rename = "conventions")]
    Conventions,
    #[serde(rename = "discussions")]
    Discussions,
    #[serde(rename = "jira-data")]
    JiraData,
}

impl Collection {
    pub const ALL: &'static [Collection] = &[
        Collection::CodePatterns,
        Collection::Conventions,
        Collection::Discussions,
        Collection::JiraData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::CodePatterns => "code-patterns",
            Collection::Conventions => "conventions",
            Collection::Discussions => "discussions",
            Collection::JiraData => "jira-data",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Collection::ALL.iter().copied().find(|c| c.as_str() == s)
    }

    /// Memory types valid for this collection
    pub fn valid_types(&self) -> &'static [MemoryType] {
        match self {
            Collection::CodePatterns => &[
                MemoryType::Implementation,
                MemoryType::ErrorFix,
                MemoryType::Refactor,
                MemoryType::FilePattern,
            ],
            Collection::Conventions => &[
                MemoryType::Rule,
                MemoryType::Guideline,
                MemoryType::Port,
                MemoryType::Naming,
                MemoryType::Structure,
            ],
            Collection::Discussions => &[
                MemoryType::Decision,
                MemoryType::SessionSummary,
                MemoryType::Blocker,
                MemoryType::Preference,
                MemoryType::UserMessage,
                MemoryType::AgentResponse,
                MemoryType::GithubCommit,
                MemoryType::GithubCodeBlob,
            ],
            Collection::JiraData => &[MemoryType::JiraIssue],
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema for memory payloads stored in the vector store.
///
/// `content_hash` uniquely identifies a record within a
/// `(collection, group_id)` partition; `stored_at` is set once at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPayload {
    pub content: String,
    /// SHA-256 hex for deduplication
    pub content_hash: String,
    /// Project identifier; multi-tenant partition key
    pub group_id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub source_hook: SourceHook,
    pub session_id: String,
    /// ISO 8601 UTC timestamp, used by decay scoring
    pub stored_at: String,

    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_importance")]
    pub importance: String,
    #[serde(default)]
    pub embedding_status: EmbeddingStatus,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub relationships: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,

    /// Turn ordering key for conversation reconstruction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jira_issue_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freshness_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freshness_checked_at: Option<String>,
}

fn default_domain() -> String {
    "general".to_string()
}

fn default_importance() -> String {
    "normal".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-code".to_string()
}

impl MemoryPayload {
    /// Build a payload with defaults for the optional enrichment fields.
    /// `stored_at` is stamped with the current UTC time.
    pub fn new(
        content: String,
        content_hash: String,
        group_id: String,
        memory_type: MemoryType,
        source_hook: SourceHook,
        session_id: String,
    ) -> Self {
        Self {
            content,
            content_hash,
            group_id,
            memory_type,
            source_hook,
            session_id,
            stored_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            domain: default_domain(),
            importance: default_importance(),
            embedding_status: EmbeddingStatus::Complete,
            embedding_model: default_embedding_model(),
            relationships: Vec::new(),
            tags: Vec::new(),
            turn_number: None,
            file_path: None,
            jira_issue_key: None,
            blob_hash: None,
            freshness_status: None,
            freshness_checked_at: None,
        }
    }

    /// Serialize to a JSON object for storage. Enum fields become their
    /// string forms; absent optionals are omitted.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_type_round_trip() {
        for ty in MemoryType::ALL {
            assert_eq!(MemoryType::parse(ty.as_str()), Some(*ty));
        }
    }

    #[test]
    fn test_source_hook_round_trip() {
        for hook in SourceHook::ALL {
            assert_eq!(SourceHook::parse(hook.as_str()), Some(*hook));
        }
    }

    #[test]
    fn test_type_belongs_to_exactly_one_collection() {
        for ty in MemoryType::ALL {
            let owners = Collection::ALL
                .iter()
                .filter(|c| c.valid_types().contains(ty))
                .count();
            assert_eq!(owners, 1, "{ty} should belong to exactly one collection");
        }
    }

    #[test]
    fn test_protected_types() {
        assert!(MemoryType::SessionSummary.is_protected());
        assert!(MemoryType::ErrorFix.is_protected());
        assert!(!MemoryType::Implementation.is_protected());
    }

    #[test]
    fn test_payload_serialization_uses_wire_names() {
        let payload = MemoryPayload::new(
            "some content here".to_string(),
            "abc".to_string(),
            "proj".to_string(),
            MemoryType::ErrorFix,
            SourceHook::PostToolUse,
            "s-1".to_string(),
        );
        let value = payload.to_value();
        assert_eq!(value["type"], "error_fix");
        assert_eq!(value["source_hook"], "PostToolUse");
        assert_eq!(value["embedding_status"], "complete");
        assert!(value.get("turn_number").is_none());
    }

    #[test]
    fn test_collection_parse() {
        assert_eq!(Collection::parse("code-patterns"), Some(Collection::CodePatterns));
        assert_eq!(Collection::parse("bogus"), None);
    }
}
