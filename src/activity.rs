// src/activity.rs
// Append-only human-readable activity log
//
// Gives users visibility into hook execution (tail -f the file); stderr
// from hooks is not consistently shown by the host. All I/O failures are
// swallowed: this log is convenience, never a dependency.

use chrono::Local;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Entries kept after each rotation
pub const MAX_LOG_ENTRIES: usize = 500;

/// Marker prefix that lets UIs expand multi-line payloads
pub const FULL_CONTENT_MARKER: &str = "FULL_CONTENT:";

/// Rotating activity log at `{install_dir}/logs/activity.log`.
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(install_dir: &Path) -> Self {
        Self {
            path: install_dir.join("logs").join("activity.log"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line and rotate. Never fails.
    pub fn log(&self, icon: &str, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("[{timestamp}] {icon} {message}\n");
        self.append(&line);
        self.rotate();
    }

    /// Append a multi-line payload behind the FULL_CONTENT marker so
    /// opting-in UIs can expand it. Newlines are escaped into one line.
    pub fn log_full_content(&self, content_lines: &[String]) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let escaped = content_lines.join("\\n");
        let line = format!("[{timestamp}] 📄 {FULL_CONTENT_MARKER}{escaped}\n");
        self.append(&line);
        self.rotate();
    }

    /// Context retrieval at session start
    pub fn log_session_start(&self, project: &str, memory_count: usize, duration_ms: f64) {
        self.log(
            "🧠",
            &format!("SessionStart: Loaded {memory_count} memories for {project} [{duration_ms:.0}ms]"),
        );
    }

    /// Code-pattern capture
    pub fn log_capture(&self, file_path: &str, status: &str) {
        self.log("📥", &format!("Capture: {file_path} ({status})"));
    }

    /// Conversation turn capture
    pub fn log_conversation(&self, role: &str, turn: u64, status: &str) {
        self.log("💬", &format!("Conversation: {role} turn {turn} ({status})"));
    }

    /// Queued-for-retry event
    pub fn log_queued(&self, reason: &str) {
        self.log("📤", &format!("Queued for retry: {reason}"));
    }

    /// Freshness scan summary
    pub fn log_freshness(&self, total: usize, stale: usize, expired: usize) {
        self.log(
            "🔍",
            &format!("Freshness: scanned {total} points, {stale} stale, {expired} expired"),
        );
    }

    fn append(&self, line: &str) {
        let Some(parent) = self.path.parent() else {
            return;
        };
        if std::fs::create_dir_all(parent).is_err() {
            return;
        }
        let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        else {
            return;
        };
        let _ = file.write_all(line.as_bytes());
    }

    /// Trim the file to the last MAX_LOG_ENTRIES lines. Reads and
    /// rewrites the whole file; fine at 500 lines, not a throughput log.
    fn rotate(&self) {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return;
        };
        let lines: Vec<&str> = content.lines().collect();
        if lines.len() <= MAX_LOG_ENTRIES {
            return;
        }
        let kept = &lines[lines.len() - MAX_LOG_ENTRIES..];
        let _ = std::fs::write(&self.path, format!("{}\n", kept.join("\n")));
    }
}
