// src/queue/mod.rs
// File-based retry queue for pending memory operations
//
// Operations that fail due to service unavailability (vector store down,
// embedding timeout) are queued to a JSONL file and retried with
// exponential backoff. One JSON object per line; exclusive advisory lock
// per operation; dir 0700, file 0600.

use crate::error::{MemoryError, Result};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Lock acquisition timeout in seconds
pub const LOCK_TIMEOUT_SECONDS: f64 = 5.0;

/// Lock retry interval
const LOCK_RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

/// Exponential backoff schedule in minutes, capped at the last value
const BACKOFF_MINUTES: [i64; 3] = [1, 5, 15];

/// Default retry budget per entry
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One pending memory operation. Serialized as a single JSONL line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    /// Complete memory payload for the storage retry path
    pub memory_data: serde_json::Value,
    /// Error code (QDRANT_UNAVAILABLE, EMBEDDING_TIMEOUT, ...)
    pub failure_reason: String,
    pub retry_count: u32,
    pub max_retries: u32,
    /// ISO 8601 timestamp when first queued
    pub queued_at: String,
    /// ISO 8601 timestamp when eligible for retry
    pub next_retry_at: String,
}

impl QueueEntry {
    fn new(memory_data: serde_json::Value, failure_reason: String, immediate: bool) -> Self {
        let now = Utc::now();
        let next_retry_at = if immediate {
            format_ts(now)
        } else {
            format_ts(backoff_from(now, 0))
        };
        Self {
            id: Uuid::new_v4().to_string(),
            memory_data,
            failure_reason,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            queued_at: format_ts(now),
            next_retry_at,
        }
    }

    /// Whether the entry's backoff has elapsed. Unparseable timestamps
    /// count as ready so corrupt entries cannot strand forever.
    fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match parse_ts(&self.next_retry_at) {
            Some(at) => at <= now,
            None => true,
        }
    }

    fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Next retry time for a given retry count: 1, 5, then 15 minutes capped.
fn backoff_from(now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
    let idx = (retry_count as usize).min(BACKOFF_MINUTES.len() - 1);
    now + ChronoDuration::minutes(BACKOFF_MINUTES[idx])
}

/// Queue statistics for monitoring
#[derive(Debug, Clone, Serialize, Default)]
pub struct QueueStats {
    pub total: usize,
    pub ready_for_retry: usize,
    pub awaiting_backoff: usize,
    pub exhausted: usize,
    pub by_failure_reason: BTreeMap<String, usize>,
}

/// File-based queue for pending memory operations.
///
/// Process-safe: every mutation happens under an exclusive advisory file
/// lock acquired with a bounded timeout. Mutating rewrites go through the
/// same file descriptor that holds the lock, so readers that also take the
/// lock observe a serial history and no partial lines.
#[derive(Clone)]
pub struct RetryQueue {
    queue_path: PathBuf,
}

impl RetryQueue {
    /// Queue at an explicit path. The parent directory is created with
    /// owner-only permissions.
    pub fn new(queue_path: impl Into<PathBuf>) -> Result<Self> {
        let queue_path = queue_path.into();
        let queue = Self { queue_path };
        queue.ensure_directory()?;
        Ok(queue)
    }

    pub fn path(&self) -> &Path {
        &self.queue_path
    }

    fn ensure_directory(&self) -> Result<()> {
        if let Some(parent) = self.queue_path.parent() {
            std::fs::create_dir_all(parent)?;
            set_permissions(parent, 0o700)?;
        }
        Ok(())
    }

    /// Append one entry under the exclusive lock. Returns the entry id.
    ///
    /// `immediate` makes the entry eligible for retry right away instead of
    /// waiting out the first backoff step.
    pub fn enqueue(
        &self,
        memory_data: serde_json::Value,
        failure_reason: &str,
        immediate: bool,
    ) -> Result<String> {
        let entry = QueueEntry::new(memory_data, failure_reason.to_string(), immediate);
        let line = serde_json::to_string(&entry)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.queue_path)?;
        lock_with_timeout(&file)?;
        let write_result = (|| -> Result<()> {
            writeln!(file, "{line}")?;
            file.flush()?;
            Ok(())
        })();
        let _ = FileExt::unlock(&file);
        write_result?;

        set_permissions(&self.queue_path, 0o600)?;

        info!(queue_id = %entry.id, failure_reason, "memory queued");
        Ok(entry.id)
    }

    /// Remove an entry after successful processing.
    pub fn dequeue(&self, queue_id: &str) -> Result<()> {
        self.locked_rewrite(|entries| {
            entries.retain(|e| e.id != queue_id);
        })?;
        info!(queue_id, "memory dequeued");
        Ok(())
    }

    /// Increment retry_count and push next_retry_at out by the backoff
    /// schedule.
    pub fn mark_failed(&self, queue_id: &str) -> Result<()> {
        self.locked_rewrite(|entries| {
            for entry in entries.iter_mut() {
                if entry.id == queue_id {
                    entry.retry_count += 1;
                    entry.next_retry_at = format_ts(backoff_from(Utc::now(), entry.retry_count));
                    break;
                }
            }
        })
    }

    /// Entries whose backoff has elapsed. By default excludes entries that
    /// already used their retry budget; `include_exhausted` lifts that for
    /// forced backfills.
    pub fn get_pending(&self, limit: usize, include_exhausted: bool) -> Result<Vec<QueueEntry>> {
        let now = Utc::now();
        let entries = self.read_all()?;
        let ready = entries
            .into_iter()
            .filter(|e| e.is_ready(now) && (include_exhausted || !e.is_exhausted()))
            .take(limit)
            .collect();
        Ok(ready)
    }

    /// Aggregate statistics for monitoring.
    pub fn get_stats(&self) -> Result<QueueStats> {
        let now = Utc::now();
        let entries = self.read_all()?;

        let mut stats = QueueStats {
            total: entries.len(),
            ..QueueStats::default()
        };
        for entry in &entries {
            if entry.is_exhausted() {
                stats.exhausted += 1;
            } else if entry.is_ready(now) {
                stats.ready_for_retry += 1;
            } else {
                stats.awaiting_backoff += 1;
            }
            *stats
                .by_failure_reason
                .entry(entry.failure_reason.clone())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }

    /// Read all entries without taking the lock. Corrupt lines are logged
    /// and skipped; a single bad line never fails the queue.
    pub fn read_all(&self) -> Result<Vec<QueueEntry>> {
        if !self.queue_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.queue_path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<QueueEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(_) => {
                    let preview: String = line.chars().take(50).collect();
                    warn!(line = %preview, "corrupt queue entry skipped");
                }
            }
        }
        Ok(entries)
    }

    /// Drop exhausted entries, rewriting the whole file atomically via a
    /// uniquely-named temp file in the same directory, fsync, then rename.
    /// Returns the number of removed entries.
    pub fn compact(&self) -> Result<usize> {
        let file = self.open_rw()?;
        lock_with_timeout(&file)?;
        let result = (|| -> Result<usize> {
            let entries = read_entries_from(&file)?;
            let kept: Vec<&QueueEntry> = entries.iter().filter(|e| !e.is_exhausted()).collect();
            let removed = entries.len() - kept.len();
            if removed > 0 {
                self.write_all_atomic(&kept)?;
            }
            Ok(removed)
        })();
        let _ = FileExt::unlock(&file);
        result
    }

    /// Locked read-modify-write through a single descriptor: read every
    /// entry, apply the mutation, truncate in place and rewrite, fsync.
    fn locked_rewrite(&self, mutate: impl FnOnce(&mut Vec<QueueEntry>)) -> Result<()> {
        let mut file = self.open_rw()?;
        lock_with_timeout(&file)?;

        let result = (|| -> Result<()> {
            let mut entries = read_entries_from(&file)?;
            mutate(&mut entries);

            file.seek(SeekFrom::Start(0))?;
            file.set_len(0)?;
            for entry in &entries {
                let line = serde_json::to_string(entry)?;
                writeln!(file, "{line}")?;
            }
            file.flush()?;
            file.sync_all()?;
            Ok(())
        })();

        let _ = FileExt::unlock(&file);
        result
    }

    fn open_rw(&self) -> Result<File> {
        let existed = self.queue_path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.queue_path)?;
        if !existed {
            set_permissions(&self.queue_path, 0o600)?;
        }
        Ok(file)
    }

    /// Rewrite the queue file from scratch: temp file in the same
    /// directory, fsync, atomic rename. The temp file is removed if any
    /// step fails.
    fn write_all_atomic(&self, entries: &[&QueueEntry]) -> Result<()> {
        let dir = self
            .queue_path
            .parent()
            .ok_or_else(|| MemoryError::Other("queue path has no parent".to_string()))?;
        let tmp_path = dir.join(format!(".queue_{}.tmp", Uuid::new_v4().simple()));

        let result = (|| -> Result<()> {
            let mut tmp = File::create(&tmp_path)?;
            for entry in entries {
                let line = serde_json::to_string(entry)?;
                writeln!(tmp, "{line}")?;
            }
            tmp.flush()?;
            tmp.sync_all()?;
            std::fs::rename(&tmp_path, &self.queue_path)?;
            set_permissions(&self.queue_path, 0o600)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result
    }
}

/// Read queue entries through an already-open (and locked) descriptor.
fn read_entries_from(mut file: &File) -> Result<Vec<QueueEntry>> {
    file.seek(SeekFrom::Start(0))?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;

    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<QueueEntry>(line) {
            entries.push(entry);
        }
        // Corrupt lines are dropped by the rewrite; logged by read_all
    }
    Ok(entries)
}

/// Non-blocking exclusive lock with a retry loop: poll every 100 ms until
/// `LOCK_TIMEOUT_SECONDS` elapses.
fn lock_with_timeout(file: &File) -> Result<()> {
    let start = Instant::now();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(_) => {
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed >= LOCK_TIMEOUT_SECONDS {
                    warn!(timeout_seconds = LOCK_TIMEOUT_SECONDS, elapsed, "lock acquisition timeout");
                    return Err(MemoryError::LockTimeout(LOCK_TIMEOUT_SECONDS));
                }
                std::thread::sleep(LOCK_RETRY_INTERVAL);
            }
        }
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_queue() -> (tempfile::TempDir, RetryQueue) {
        let dir = tempfile::tempdir().unwrap();
        let queue = RetryQueue::new(dir.path().join("queue").join("pending_queue.jsonl")).unwrap();
        (dir, queue)
    }

    #[test]
    fn test_enqueue_then_read_back() {
        let (_dir, queue) = temp_queue();
        let id = queue
            .enqueue(json!({"content": "x"}), "QDRANT_UNAVAILABLE", false)
            .unwrap();

        let entries = queue.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].failure_reason, "QDRANT_UNAVAILABLE");
        assert_eq!(entries[0].retry_count, 0);
        assert_eq!(entries[0].max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_backoff_schedule() {
        let now = Utc::now();
        let first = backoff_from(now, 0) - now;
        let second = backoff_from(now, 1) - now;
        let third = backoff_from(now, 2) - now;
        let capped = backoff_from(now, 9) - now;
        assert_eq!(first.num_minutes(), 1);
        assert_eq!(second.num_minutes(), 5);
        assert_eq!(third.num_minutes(), 15);
        assert_eq!(capped.num_minutes(), 15);
    }

    #[test]
    fn test_immediate_entry_is_pending() {
        let (_dir, queue) = temp_queue();
        queue.enqueue(json!({"a": 1}), "EMBEDDING_TIMEOUT", true).unwrap();
        let pending = queue.get_pending(10, false).unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_backoff_entry_not_pending_yet() {
        let (_dir, queue) = temp_queue();
        queue.enqueue(json!({"a": 1}), "QDRANT_UNAVAILABLE", false).unwrap();
        let pending = queue.get_pending(10, false).unwrap();
        assert!(pending.is_empty());
        // Invariant: next_retry_at >= queued_at
        let entry = &queue.read_all().unwrap()[0];
        assert!(entry.next_retry_at >= entry.queued_at);
    }

    #[test]
    fn test_dequeue_removes_entry() {
        let (_dir, queue) = temp_queue();
        let id1 = queue.enqueue(json!({"a": 1}), "R", true).unwrap();
        let id2 = queue.enqueue(json!({"a": 2}), "R", true).unwrap();

        queue.dequeue(&id1).unwrap();
        let entries = queue.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id2);
    }

    #[test]
    fn test_mark_failed_increments_and_reschedules() {
        let (_dir, queue) = temp_queue();
        let id = queue.enqueue(json!({"a": 1}), "R", true).unwrap();

        queue.mark_failed(&id).unwrap();
        let entry = &queue.read_all().unwrap()[0];
        assert_eq!(entry.retry_count, 1);
        let next = parse_ts(&entry.next_retry_at).unwrap();
        let delta = next - Utc::now();
        // retry_count 1 maps to the 5-minute step
        assert!(delta.num_seconds() > 4 * 60 && delta.num_seconds() <= 5 * 60);
    }

    #[test]
    fn test_exhausted_excluded_by_default() {
        let (_dir, queue) = temp_queue();
        let id = queue.enqueue(json!({"a": 1}), "R", true).unwrap();
        for _ in 0..DEFAULT_MAX_RETRIES {
            queue.mark_failed(&id).unwrap();
        }

        let entry = &queue.read_all().unwrap()[0];
        assert!(entry.is_exhausted());
        assert!(queue.get_pending(10, false).unwrap().is_empty());

        // Force mode includes exhausted entries once their backoff elapses;
        // rewrite next_retry_at into the past to simulate that.
        queue
            .locked_rewrite(|entries| {
                entries[0].next_retry_at = "2020-01-01T00:00:00Z".to_string();
            })
            .unwrap();
        assert_eq!(queue.get_pending(10, true).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_line_skipped() {
        let (_dir, queue) = temp_queue();
        let id = queue.enqueue(json!({"a": 1}), "R", true).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(queue.path()).unwrap();
            writeln!(file, "{{not valid json").unwrap();
        }
        let id2 = queue.enqueue(json!({"a": 2}), "R", true).unwrap();

        let entries = queue.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[1].id, id2);
    }

    #[test]
    fn test_stats() {
        let (_dir, queue) = temp_queue();
        queue.enqueue(json!({"a": 1}), "QDRANT_UNAVAILABLE", true).unwrap();
        queue.enqueue(json!({"a": 2}), "QDRANT_UNAVAILABLE", false).unwrap();
        let exhausted_id = queue.enqueue(json!({"a": 3}), "EMBEDDING_TIMEOUT", true).unwrap();
        for _ in 0..DEFAULT_MAX_RETRIES {
            queue.mark_failed(&exhausted_id).unwrap();
        }

        let stats = queue.get_stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.ready_for_retry, 1);
        assert_eq!(stats.awaiting_backoff, 1);
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.by_failure_reason.get("QDRANT_UNAVAILABLE"), Some(&2));
        assert_eq!(stats.by_failure_reason.get("EMBEDDING_TIMEOUT"), Some(&1));
    }

    #[test]
    fn test_compact_drops_exhausted() {
        let (_dir, queue) = temp_queue();
        queue.enqueue(json!({"a": 1}), "R", true).unwrap();
        let exhausted_id = queue.enqueue(json!({"a": 2}), "R", true).unwrap();
        for _ in 0..DEFAULT_MAX_RETRIES {
            queue.mark_failed(&exhausted_id).unwrap();
        }

        let removed = queue.compact().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(queue.read_all().unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, queue) = temp_queue();
        queue.enqueue(json!({"a": 1}), "R", true).unwrap();

        let file_mode = std::fs::metadata(queue.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(queue.path().parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn test_durability_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.jsonl");
        let id = {
            let queue = RetryQueue::new(&path).unwrap();
            queue.enqueue(json!({"content": "persisted"}), "R", false).unwrap()
        };
        // Fresh handle, as after a crash/restart
        let queue = RetryQueue::new(&path).unwrap();
        let entries = queue.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].memory_data["content"], "persisted");
    }
}
