// src/hooks/mod.rs
// Graceful-exit runtime for host-facing hook handlers
//
// No uncaught failure ever reaches the host: every handler runs through
// run_graceful, which converts errors AND panics into exit code 1 plus a
// structured log record. The host continues either way.

pub mod post_tool;
pub mod session;
pub mod stop;
pub mod user_prompt;

use crate::config::MemoryConfig;
use crate::metrics;
use std::future::Future;
use std::io::{Read, Write};
use std::time::Instant;
use tracing::{error, warn};

/// Normal completion
pub const EXIT_SUCCESS: i32 = 0;

/// Error, but the host continues (graceful degradation)
pub const EXIT_NON_BLOCKING: i32 = 1;

/// Block the host action. Reserved: never emitted by this runtime.
pub const EXIT_BLOCKING: i32 = 2;

/// Largest hook input accepted from stdin
const MAX_HOOK_INPUT_BYTES: u64 = 1_048_576;

/// Run a hook body under the graceful-exit contract.
///
/// The body runs on its own task so a panic surfaces as a JoinError
/// instead of unwinding into the runtime. Success exits 0; any error or
/// panic logs one structured `hook failed` record and exits 1. This
/// function always terminates the process.
pub async fn run_graceful<F>(hook_name: &str, config: &MemoryConfig, body: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let start = Instant::now();
    let result = tokio::task::spawn(body).await;
    let duration = start.elapsed().as_secs_f64();
    metrics::push_hook_duration(config, hook_name, "unknown", duration);

    match result {
        Ok(Ok(())) => std::process::exit(EXIT_SUCCESS),
        Ok(Err(e)) => {
            error!(
                hook = hook_name,
                error = %e,
                error_type = error_type(&e),
                "hook failed"
            );
            std::process::exit(EXIT_NON_BLOCKING);
        }
        Err(join_error) => {
            error!(
                hook = hook_name,
                error = %join_error,
                error_type = "panic",
                "hook failed"
            );
            std::process::exit(EXIT_NON_BLOCKING);
        }
    }
}

fn error_type(e: &anyhow::Error) -> &'static str {
    e.downcast_ref::<crate::error::MemoryError>()
        .map(|m| m.code())
        .unwrap_or("unknown")
}

/// Exit with code 0.
pub fn exit_success() -> ! {
    std::process::exit(EXIT_SUCCESS)
}

/// Exit non-blocking (code 1) for an expected degradation, with a logged
/// reason.
pub fn exit_graceful(reason: &str) -> ! {
    warn!(reason, "graceful exit");
    std::process::exit(EXIT_NON_BLOCKING)
}

/// Read hook input from stdin (the host passes one JSON object).
pub fn read_hook_input() -> anyhow::Result<serde_json::Value> {
    let mut input = String::new();
    std::io::stdin()
        .take(MAX_HOOK_INPUT_BYTES)
        .read_to_string(&mut input)?;
    Ok(serde_json::from_str(&input)?)
}

/// Write hook output to stdout. A serialization failure degrades to `{}`.
pub fn write_hook_output(output: &serde_json::Value) {
    let mut stdout = std::io::stdout();
    match serde_json::to_string(output) {
        Ok(s) => {
            let _ = writeln!(stdout, "{s}");
        }
        Err(e) => {
            eprintln!("failed to serialize hook output: {e}");
            let _ = writeln!(stdout, "{{}}");
        }
    }
    // The graceful runtime exits via process::exit, which skips Drop;
    // flush so the host never reads a truncated line.
    let _ = stdout.flush();
}

/// Shared accessors over the host's hook input shape
pub(crate) fn input_str<'a>(input: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

pub(crate) fn session_id_from(input: &serde_json::Value) -> String {
    input_str(input, "session_id").unwrap_or("unknown").to_string()
}

pub(crate) fn cwd_from(input: &serde_json::Value) -> String {
    input_str(input, "cwd")
        .map(String::from)
        .unwrap_or_else(|| {
            std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| ".".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(EXIT_SUCCESS, 0);
        assert_eq!(EXIT_NON_BLOCKING, 1);
        assert_eq!(EXIT_BLOCKING, 2);
    }

    #[test]
    fn test_input_accessors() {
        let input = serde_json::json!({
            "session_id": "s-1",
            "cwd": "/work/proj",
        });
        assert_eq!(session_id_from(&input), "s-1");
        assert_eq!(cwd_from(&input), "/work/proj");
    }

    #[test]
    fn test_missing_session_id_defaults() {
        let input = serde_json::json!({});
        assert_eq!(session_id_from(&input), "unknown");
    }

    #[test]
    fn test_error_type_extraction() {
        let err = anyhow::Error::from(crate::error::MemoryError::EmbeddingTimeout);
        assert_eq!(error_type(&err), "EMBEDDING_TIMEOUT");
        let plain = anyhow::anyhow!("something");
        assert_eq!(error_type(&plain), "unknown");
    }
}
