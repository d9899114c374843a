// src/metrics/trace.rs
// Fire-and-forget trace event buffer
//
// Trace events are serialized as one JSON file each into a buffer
// directory; a separate flush worker forwards them. A kill-switch and an
// MB-based cap are checked before every write. Overhead is a single
// atomic file write.

use crate::config::MemoryConfig;
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Buffer size tracked incrementally to avoid an O(n) directory scan on
/// every emit. -1 means not yet calibrated; calibration scans once.
static BUFFER_SIZE_BYTES: AtomicI64 = AtomicI64::new(-1);

#[derive(Debug, Serialize)]
struct TraceEvent<'a> {
    timestamp: f64,
    event_type: &'a str,
    trace_id: String,
    span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
    data: serde_json::Value,
}

fn buffer_dir(config: &MemoryConfig) -> PathBuf {
    config.install_dir.join("trace_buffer")
}

/// One-time O(n) scan to initialize the running byte counter.
fn calibrate(dir: &PathBuf) -> i64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len() as i64)
        .sum()
}

/// Write a trace event into the buffer directory.
///
/// Returns true if the event was written, false if skipped (disabled or
/// buffer at capacity). Writes go through a temp file + rename so the
/// flush worker never observes a partial event.
pub fn emit_trace_event(
    config: &MemoryConfig,
    event_type: &str,
    data: serde_json::Value,
    session_id: Option<&str>,
    project_id: Option<&str>,
) -> bool {
    if !config.trace_enabled {
        return false;
    }

    let dir = buffer_dir(config);
    if std::fs::create_dir_all(&dir).is_err() {
        return false;
    }

    if BUFFER_SIZE_BYTES.load(Ordering::Relaxed) < 0 {
        BUFFER_SIZE_BYTES.store(calibrate(&dir), Ordering::Relaxed);
    }
    let cap_bytes = (config.trace_buffer_max_mb as i64) * 1024 * 1024;
    if BUFFER_SIZE_BYTES.load(Ordering::Relaxed) >= cap_bytes {
        return false;
    }

    let now = Utc::now();
    let event = TraceEvent {
        timestamp: now.timestamp_millis() as f64 / 1000.0,
        event_type,
        trace_id: Uuid::new_v4().simple().to_string(),
        span_id: Uuid::new_v4().simple().to_string(),
        session_id,
        project_id,
        data,
    };

    let Ok(serialized) = serde_json::to_string(&event) else {
        return false;
    };

    let tmp_path = dir.join(format!(".tmp_{}", Uuid::new_v4().simple()));
    let final_path = dir.join(format!("{}.json", Uuid::new_v4().simple()));

    let written = std::fs::write(&tmp_path, &serialized)
        .and_then(|_| std::fs::rename(&tmp_path, &final_path))
        .is_ok();
    if written {
        BUFFER_SIZE_BYTES.fetch_add(serialized.len() as i64, Ordering::Relaxed);
    } else {
        let _ = std::fs::remove_file(&tmp_path);
    }
    written
}
