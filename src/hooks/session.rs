// src/hooks/session.rs
// SessionStart handler - inject relevant memories as context

use crate::activity::ActivityLog;
use crate::config::{detect_project, MemoryConfig};
use crate::filters::{filter_low_value_content, smart_truncate};
use crate::memory::Collection;
use crate::search::{format_tiered_results, MemorySearch, SearchOptions};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Context budget in characters, derived from the token budget with the
/// usual ~4 chars/token rule of thumb.
const CHARS_PER_TOKEN: usize = 4;

pub async fn run(config: Arc<MemoryConfig>) -> anyhow::Result<()> {
    let input = super::read_hook_input()?;
    let cwd = super::cwd_from(&input);
    let group_id = detect_project(&cwd);

    let start = Instant::now();
    let search = MemorySearch::new(config.clone())?;

    // Seed query: the project name plus any prompt text the host passed
    let query = super::input_str(&input, "prompt")
        .map(String::from)
        .unwrap_or_else(|| format!("{group_id} project context"));

    let options = SearchOptions {
        cwd: Some(cwd.clone()),
        fast_mode: true,
        ..SearchOptions::default()
    };
    let (project_results, shared_results) = search
        .search_both_collections(&query, Collection::Discussions, &options)
        .await?;

    let mut all_results = project_results;
    all_results.extend(shared_results);
    let memory_count = all_results.len();

    let formatted = format_tiered_results(&all_results);
    let cleaned = filter_low_value_content(&formatted);
    let budget_chars = config.token_budget * CHARS_PER_TOKEN;
    let context = smart_truncate(&cleaned, budget_chars);

    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    ActivityLog::new(&config.install_dir).log_session_start(&group_id, memory_count, duration_ms);
    debug!(
        group_id = %group_id,
        memory_count,
        context_chars = context.len(),
        "session context assembled"
    );

    super::write_hook_output(&serde_json::json!({
        "additionalContext": context,
    }));
    Ok(())
}
