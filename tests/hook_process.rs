// tests/hook_process.rs
// The graceful-exit contract, exercised through the real binary

use std::io::Write;
use std::process::{Command, Stdio};

fn engram_cmd(install_dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_engram"));
    cmd.env("ENGRAM_INSTALL_DIR", install_dir)
        .env("ENGRAM_QUEUE_PATH", install_dir.join("queue").join("q.jsonl"))
        // Services down on purpose
        .env("QDRANT_HOST", "127.0.0.1")
        .env("QDRANT_PORT", "1025")
        .env("EMBEDDING_HOST", "127.0.0.1")
        .env("EMBEDDING_PORT", "1026")
        .env("ENGRAM_CLASSIFIER_ENABLED", "false")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

fn run_hook(install_dir: &std::path::Path, hook: &str, stdin: &str) -> (i32, String, String) {
    let mut child = engram_cmd(install_dir)
        .arg("hook")
        .arg(hook)
        .spawn()
        .expect("binary spawns");
    child
        .stdin
        .as_mut()
        .expect("stdin piped")
        .write_all(stdin.as_bytes())
        .expect("stdin writable");
    let output = child.wait_with_output().expect("hook completes");
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )
}

#[test]
fn test_invalid_input_exits_non_blocking() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _stdout, stderr) = run_hook(dir.path(), "user-prompt", "this is not json");

    // Errors degrade to exit 1; the host continues
    assert_eq!(code, 1);
    assert!(stderr.contains("hook failed"));
}

#[test]
fn test_short_prompt_is_skipped_successfully() {
    let dir = tempfile::tempdir().unwrap();
    let input = serde_json::json!({
        "session_id": "s-1",
        "cwd": dir.path().to_str().unwrap(),
        "prompt": "hi",
    })
    .to_string();
    let (code, stdout, _stderr) = run_hook(dir.path(), "user-prompt", &input);

    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "{}");
}

#[test]
fn test_capture_with_services_down_queues_and_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let input = serde_json::json!({
        "session_id": "s-1",
        "cwd": dir.path().to_str().unwrap(),
        "prompt": "please remember that the gateway port moved to 9443",
    })
    .to_string();
    let (code, stdout, _stderr) = run_hook(dir.path(), "user-prompt", &input);

    assert_eq!(code, 0, "degraded capture must not fail the host");
    let output: serde_json::Value = serde_json::from_str(stdout.trim()).expect("json output");
    assert_eq!(output["status"], "queued");

    // The record survived to disk
    let queue_file = dir.path().join("queue").join("q.jsonl");
    let content = std::fs::read_to_string(queue_file).expect("queue file exists");
    assert!(content.contains("gateway port moved"));
}

#[test]
fn test_post_tool_filters_non_code() {
    let dir = tempfile::tempdir().unwrap();
    let input = serde_json::json!({
        "session_id": "s-1",
        "cwd": dir.path().to_str().unwrap(),
        "tool_name": "Write",
        "tool_input": {
            "file_path": "README.md",
            "content": "# Just documentation\nwith some text",
        },
    })
    .to_string();
    let (code, stdout, _stderr) = run_hook(dir.path(), "post-tool", &input);

    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "{}");
    // Nothing queued: the filter rejected it before storage
    assert!(!dir.path().join("queue").join("q.jsonl").exists());
}

#[test]
fn test_unknown_tool_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let input = serde_json::json!({
        "session_id": "s-1",
        "cwd": dir.path().to_str().unwrap(),
        "tool_name": "Bash",
        "tool_input": {"command": "ls"},
    })
    .to_string();
    let (code, stdout, _stderr) = run_hook(dir.path(), "post-tool", &input);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "{}");
}
