// src/hooks/user_prompt.rs
// UserPromptSubmit handler - capture user messages into discussions

use crate::activity::ActivityLog;
use crate::config::MemoryConfig;
use crate::memory::{Collection, MemoryType, SourceHook};
use crate::storage::{MemoryStorage, StoreOutcome, StoreRequest};
use std::sync::Arc;
use tracing::debug;

pub async fn run(config: Arc<MemoryConfig>) -> anyhow::Result<()> {
    let input = super::read_hook_input()?;
    let session_id = super::session_id_from(&input);
    let cwd = super::cwd_from(&input);

    let Some(prompt) = super::input_str(&input, "prompt") else {
        debug!("no prompt in hook input");
        super::write_hook_output(&serde_json::json!({}));
        return Ok(());
    };

    // Validation rejects sub-10-char content; skip the round-trip
    if prompt.chars().count() < 10 {
        debug!("prompt below minimum length");
        super::write_hook_output(&serde_json::json!({}));
        return Ok(());
    }

    let storage = MemoryStorage::new(config.clone())?;
    let request = StoreRequest::new(
        prompt,
        cwd,
        MemoryType::UserMessage,
        SourceHook::UserPromptSubmit,
        session_id,
        Collection::Discussions,
    );

    let outcome = storage.store_memory(request).await?;
    let status = match &outcome {
        StoreOutcome::Stored { .. } => "stored",
        StoreOutcome::Duplicate { .. } => "duplicate",
        StoreOutcome::Queued { .. } => "queued",
    };
    ActivityLog::new(&config.install_dir).log_conversation("user", 0, status);

    super::write_hook_output(&serde_json::to_value(&outcome)?);
    Ok(())
}
