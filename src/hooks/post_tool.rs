// src/hooks/post_tool.rs
// PostToolUse handler - capture code patterns from file edits

use crate::activity::ActivityLog;
use crate::config::MemoryConfig;
use crate::filters::CodePatternFilter;
use crate::memory::{Collection, MemoryType, SourceHook};
use crate::storage::{MemoryStorage, StoreOutcome, StoreRequest};
use std::sync::Arc;
use tracing::debug;

/// Tools whose output carries code worth capturing
const CAPTURE_TOOLS: &[&str] = &["Write", "Edit", "NotebookEdit", "MultiEdit"];

pub async fn run(config: Arc<MemoryConfig>) -> anyhow::Result<()> {
    let input = super::read_hook_input()?;
    let session_id = super::session_id_from(&input);
    let cwd = super::cwd_from(&input);

    let tool_name = super::input_str(&input, "tool_name").unwrap_or_default().to_string();
    if !CAPTURE_TOOLS.contains(&tool_name.as_str()) {
        debug!(tool_name, "tool not captured");
        super::write_hook_output(&serde_json::json!({}));
        return Ok(());
    }

    let tool_input = input.get("tool_input").cloned().unwrap_or_default();
    let file_path = tool_input
        .get("file_path")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let content = tool_input
        .get("content")
        .or_else(|| tool_input.get("new_string"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let filter = CodePatternFilter::new();
    if file_path.is_empty() || !filter.should_store(&file_path, &content, &tool_name) {
        debug!(file_path, "filtered out");
        super::write_hook_output(&serde_json::json!({}));
        return Ok(());
    }

    let truncated = filter.truncate_content(&content);
    let storage = MemoryStorage::new(config.clone())?;
    let mut request = StoreRequest::new(
        truncated,
        cwd,
        MemoryType::Implementation,
        SourceHook::PostToolUse,
        session_id,
        Collection::CodePatterns,
    );
    request.file_path = Some(file_path.clone());

    let outcome = storage.store_memory(request).await?;
    let status = match &outcome {
        StoreOutcome::Stored { .. } => "stored",
        StoreOutcome::Duplicate { .. } => "duplicate",
        StoreOutcome::Queued { .. } => "queued",
    };
    ActivityLog::new(&config.install_dir).log_capture(&file_path, status);

    super::write_hook_output(&serde_json::to_value(&outcome)?);
    Ok(())
}
