// src/hooks/stop.rs
// Stop handler - capture the agent's final response into discussions

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

    // The host passes the final assistant message either inline or via a
    // transcript path; inline wins.
    let response = super::input_str(&input, "last_assistant_message")
        .map(String::from)
        .or_else(|| read_last_from_transcript(&input));

    let Some(response) = response else {
        debug!("no agent response available to capture");
        super::write_hook_output(&serde_json::json!({}));
        return Ok(());
    };

    if response.chars().count() < 10 {
        super::write_hook_output(&serde_json::json!({}));
        return Ok(());
    }

    let storage = MemoryStorage::new(config.clone())?;
    let request = StoreRequest::new(
        response,
        cwd,
        MemoryType::AgentResponse,
        SourceHook::Stop,
        session_id,
        Collection::Discussions,
    );

    let outcome = storage.store_memory(request).await?;
    let status = match &outcome {
        StoreOutcome::Stored { .. } => "stored",
        StoreOutcome::Duplicate { .. } => "duplicate",
        StoreOutcome::Queued { .. } => "queued",
    };
    ActivityLog::new(&config.install_dir).log_conversation("agent", 0, status);

    super::write_hook_output(&serde_json::to_value(&outcome)?);
    Ok(())
}

/// Pull the last assistant text message out of a JSONL transcript file.
fn read_last_from_transcript(input: &serde_json::Value) -> Option<String> {
    let path = super::input_str(input, "transcript_path")?;
    let content = std::fs::read_to_string(path).ok()?;

    let mut last: Option<String> = None;
    for line in content.lines() {
        let Ok(entry) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if entry["type"] == "assistant" {
            let text = entry["message"]["content"]
                .as_array()
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter(|b| b["type"] == "text")
                        .filter_map(|b| b["text"].as_str())
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            if !text.is_empty() {
                last = Some(text);
            }
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_last_from_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{"type":"user","message":{{"content":[{{"type":"text","text":"hi"}}]}}}}"#
        )
        .unwrap();
        writeln!(
            file,
            r#"{{"type":"assistant","message":{{"content":[{{"type":"text","text":"first"}}]}}}}"#
        )
        .unwrap();
        writeln!(
            file,
            r#"{{"type":"assistant","message":{{"content":[{{"type":"text","text":"second"}}]}}}}"#
        )
        .unwrap();

        let input = serde_json::json!({"transcript_path": path.to_str().unwrap()});
        assert_eq!(read_last_from_transcript(&input), Some("second".to_string()));
    }

    #[test]
    fn test_transcript_missing_file() {
        let input = serde_json::json!({"transcript_path": "/nonexistent/t.jsonl"});
        assert_eq!(read_last_from_transcript(&input), None);
    }
}
