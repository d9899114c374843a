// src/search/jira.rs
// Search over the jira-data collection with issue-aware formatting

use super::{MemorySearch, SearchOptions, SearchResult};
use crate::error::{MemoryError, Result};
use crate::memory::Collection;
use serde::Serialize;
use tracing::info;

/// Snippet budget for result previews
const SNIPPET_MAX_CHARS: usize = 300;

/// Filters for a Jira search. `group_id` is the Jira instance hostname
/// and doubles as the tenant key; it is required, never inferred.
#[derive(Debug, Clone, Default)]
pub struct JiraSearchFilters {
    pub project: Option<String>,
    pub memory_type: Option<String>,
    pub issue_type: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
}

/// A Jira search hit with display-ready extras.
#[derive(Debug, Clone, Serialize)]
pub struct JiraSearchResult {
    pub id: String,
    pub score: f32,
    pub jira_url: String,
    pub badges: String,
    pub snippet: String,
    pub content: String,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl MemorySearch {
    /// Semantic search against the jira-data collection.
    ///
    /// `group_id` is mandatory tenant isolation: a missing instance key
    /// would leak issues across Jira instances in multi-tenant
    /// deployments.
    pub async fn search_jira(
        &self,
        query: &str,
        group_id: &str,
        filters: &JiraSearchFilters,
        limit: usize,
    ) -> Result<Vec<JiraSearchResult>> {
        if group_id.is_empty() {
            return Err(MemoryError::Validation(vec![
                "group_id is required for tenant isolation".to_string(),
            ]));
        }

        let mut options = SearchOptions {
            group_id: Some(Some(group_id.to_string())),
            limit: Some(limit),
            ..SearchOptions::default()
        };
        if let Some(memory_type) = &filters.memory_type {
            options.memory_types = vec![memory_type.clone()];
        }

        let mut results = self.search(query, Collection::JiraData, &options).await?;

        // Jira-specific payload filters are low-cardinality; applying
        // them after the ranked query keeps the filter index small.
        results.retain(|r| {
            payload_matches(r, "jira_project", filters.project.as_deref())
                && payload_matches(r, "jira_issue_type", filters.issue_type.as_deref())
                && payload_matches(r, "jira_status", filters.status.as_deref())
                && payload_matches(r, "jira_priority", filters.priority.as_deref())
        });

        let formatted: Vec<JiraSearchResult> = results
            .into_iter()
            .map(|r| format_result(r, group_id))
            .collect();

        info!(
            group_id,
            query = %query.chars().take(50).collect::<String>(),
            results_count = formatted.len(),
            "jira search completed"
        );
        Ok(formatted)
    }
}

fn payload_matches(result: &SearchResult, key: &str, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    result
        .payload
        .get(key)
        .and_then(|v| v.as_str())
        .is_some_and(|v| v == expected)
}

fn format_result(result: SearchResult, instance_url: &str) -> JiraSearchResult {
    let issue_key = result
        .payload
        .get("jira_issue_key")
        .and_then(|v| v.as_str())
        .unwrap_or("UNKNOWN")
        .to_string();
    let comment_id = result
        .payload
        .get("jira_comment_id")
        .and_then(|v| v.as_str())
        .map(String::from);
    let content = result.content().to_string();

    JiraSearchResult {
        id: result.id,
        score: result.score,
        jira_url: format_jira_url(instance_url, &issue_key, comment_id.as_deref()),
        badges: format_badges(&result.payload),
        snippet: truncate_snippet(&content, SNIPPET_MAX_CHARS),
        content,
        payload: result.payload,
    }
}

/// Full URL to an issue, optionally deep-linking a comment.
fn format_jira_url(instance_url: &str, issue_key: &str, comment_id: Option<&str>) -> String {
    match comment_id {
        Some(id) => format!("https://{instance_url}/browse/{issue_key}?focusedCommentId={id}"),
        None => format!("https://{instance_url}/browse/{issue_key}"),
    }
}

/// Metadata badges like `[Type: Bug] [Status: In Progress] [Priority: High]`.
fn format_badges(payload: &serde_json::Map<String, serde_json::Value>) -> String {
    let get = |key: &str| payload.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty());

    let mut badges = Vec::new();
    if let Some(issue_type) = get("jira_issue_type") {
        badges.push(format!("Type: {issue_type}"));
    }
    if let Some(status) = get("jira_status") {
        badges.push(format!("Status: {status}"));
    }
    if let Some(priority) = get("jira_priority") {
        badges.push(format!("Priority: {priority}"));
    }
    // Comments carry an author, issues a reporter
    match payload.get("type").and_then(|v| v.as_str()) {
        Some("jira_comment") => {
            if let Some(author) = get("jira_author") {
                badges.push(format!("Author: {author}"));
            }
        }
        Some("jira_issue") => {
            if let Some(reporter) = get("jira_reporter") {
                badges.push(format!("Reporter: {reporter}"));
            }
        }
        _ => {}
    }

    badges
        .iter()
        .map(|b| format!("[{b}]"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate_snippet(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let kept: String = content.chars().take(max_chars).collect();
    format!("{kept}...")
}
