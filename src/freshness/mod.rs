// src/freshness/mod.rs
// Freshness detection for code-patterns memories
//
// Compares stored code-pattern memories against synced code blob data in
// the discussions collection to detect memories whose underlying source
// file has moved on. On-demand, not scheduled.

use crate::config::MemoryConfig;
use crate::memory::Collection;
use crate::store::{field_eq, must_filter, VectorStore};
use chrono::{DateTime, SecondsFormat, Utc};
use qdrant_client::qdrant::{Condition, PointId, Value as QdrantValue};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

/// Scroll page size for both collections
const SCROLL_PAGE: u32 = 100;

/// Freshness classification tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessTier {
    Fresh,
    Aging,
    Stale,
    Expired,
    Unknown,
}

impl FreshnessTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            FreshnessTier::Fresh => "fresh",
            FreshnessTier::Aging => "aging",
            FreshnessTier::Stale => "stale",
            FreshnessTier::Expired => "expired",
            FreshnessTier::Unknown => "unknown",
        }
    }
}

/// Ground truth for one file from the code sync
#[derive(Debug, Clone)]
pub struct GroundTruth {
    pub blob_hash: String,
    pub last_commit_sha: String,
    pub last_synced: String,
}

/// Freshness check result for a single code-patterns point
#[derive(Debug, Clone, Serialize)]
pub struct FreshnessResult {
    pub point_id: String,
    pub file_path: String,
    pub memory_type: String,
    pub status: FreshnessTier,
    pub reason: String,
    pub stored_at: String,
    pub blob_hash_match: Option<bool>,
    pub commit_count: u32,
}

/// Aggregated scan report
#[derive(Debug, Clone, Serialize)]
pub struct FreshnessReport {
    pub total_checked: usize,
    pub fresh_count: usize,
    pub aging_count: usize,
    pub stale_count: usize,
    pub expired_count: usize,
    pub unknown_count: usize,
    pub duration_seconds: f64,
    pub results: Vec<FreshnessResult>,
    pub timestamp: String,
}

impl FreshnessReport {
    fn empty(duration_seconds: f64) -> Self {
        Self {
            total_checked: 0,
            fresh_count: 0,
            aging_count: 0,
            stale_count: 0,
            expired_count: 0,
            unknown_count: 0,
            duration_seconds,
            results: Vec::new(),
            timestamp: now_iso(),
        }
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Classify a point's freshness from the available signals.
///
/// Priority: explicit blob-hash mismatch is expired regardless of commit
/// count; then descending commit-count thresholds; low activity is fresh.
pub fn classify_freshness(
    blob_hash_match: Option<bool>,
    commit_count: u32,
    config: &MemoryConfig,
) -> (FreshnessTier, String) {
    if blob_hash_match == Some(false) {
        return (
            FreshnessTier::Expired,
            format!("Blob hash mismatch: source file content has changed (commit_count={commit_count})"),
        );
    }

    let hash_note = match blob_hash_match {
        Some(true) => "content matches",
        _ => "hash comparison unavailable",
    };

    let thresholds = &config.freshness;
    if commit_count >= thresholds.commit_threshold_expired {
        (
            FreshnessTier::Expired,
            format!(
                "High churn: {hash_note}, {commit_count} commits (threshold={})",
                thresholds.commit_threshold_expired
            ),
        )
    } else if commit_count >= thresholds.commit_threshold_stale {
        (
            FreshnessTier::Stale,
            format!(
                "Significant activity: {hash_note}, {commit_count} commits (threshold={})",
                thresholds.commit_threshold_stale
            ),
        )
    } else if commit_count >= thresholds.commit_threshold_aging {
        (
            FreshnessTier::Aging,
            format!(
                "Some activity: {hash_note}, {commit_count} commits (threshold={})",
                thresholds.commit_threshold_aging
            ),
        )
    } else {
        (
            FreshnessTier::Fresh,
            format!("Low activity ({commit_count} commits), {hash_note}"),
        )
    }
}

/// Build the `file_path -> GroundTruth` lookup from current code blob
/// points in the discussions collection. One scroll pass; the first entry
/// per file path wins (chunks of the same file share a blob hash).
pub async fn build_ground_truth_map(store: &VectorStore) -> HashMap<String, GroundTruth> {
    let mut ground_truth = HashMap::new();
    let filter = must_filter(vec![
        field_eq("source", "github"),
        field_eq("type", "github_code_blob"),
        Condition::matches("is_current", true),
    ]);

    let mut offset: Option<PointId> = None;
    loop {
        let (points, next_offset) = match store
            .scroll(Collection::Discussions, filter.clone(), SCROLL_PAGE, offset)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "ground truth scroll failed");
                return ground_truth;
            }
        };

        for point in &points {
            let Some(file_path) = payload_str(&point.payload, "file_path") else {
                continue;
            };
            ground_truth.entry(file_path).or_insert_with(|| GroundTruth {
                blob_hash: payload_str(&point.payload, "blob_hash").unwrap_or_default(),
                last_commit_sha: payload_str(&point.payload, "last_commit_sha").unwrap_or_default(),
                last_synced: payload_str(&point.payload, "last_synced").unwrap_or_default(),
            });
        }

        match next_offset {
            Some(next) if !points.is_empty() => offset = Some(next),
            _ => break,
        }
    }

    info!(file_count = ground_truth.len(), "ground truth map built");
    ground_truth
}

/// Count synced commits touching a file after `since`. Linear in repo
/// history; acceptable for on-demand scans.
pub async fn count_commits_for_file(store: &VectorStore, file_path: &str, since: &str) -> u32 {
    let Ok(since_dt) = DateTime::parse_from_rfc3339(&since.replace('Z', "+00:00")) else {
        return 0;
    };
    let since_dt = since_dt.with_timezone(&Utc);

    let filter = must_filter(vec![
        field_eq("source", "github"),
        field_eq("type", "github_commit"),
        Condition::matches("is_current", true),
    ]);

    let mut count = 0u32;
    let mut offset: Option<PointId> = None;
    loop {
        let (points, next_offset) = match store
            .scroll(Collection::Discussions, filter.clone(), SCROLL_PAGE, offset)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "commit scroll failed");
                return count;
            }
        };

        for point in &points {
            let Some(timestamp) = payload_str(&point.payload, "timestamp") else {
                continue;
            };
            let Ok(commit_dt) = DateTime::parse_from_rfc3339(&timestamp.replace('Z', "+00:00"))
            else {
                continue;
            };
            if commit_dt.with_timezone(&Utc) <= since_dt {
                continue;
            }
            let touched = payload_list(&point.payload, "files_changed")
                .iter()
                .any(|f| f == file_path);
            if touched {
                count += 1;
            }
        }

        match next_offset {
            Some(next) if !points.is_empty() => offset = Some(next),
            _ => break,
        }
    }

    count
}

/// Run a full freshness scan of the code-patterns collection.
///
/// Never raises: service unavailability and missing ground truth both
/// produce an empty report.
pub async fn run_freshness_scan(
    store: &VectorStore,
    config: &MemoryConfig,
    group_id: Option<&str>,
) -> FreshnessReport {
    let start = Instant::now();

    if !config.freshness.enabled {
        info!("freshness scan disabled");
        return FreshnessReport::empty(0.0);
    }

    let ground_truth_map = build_ground_truth_map(store).await;
    if ground_truth_map.is_empty() {
        warn!("no ground truth data, skipping freshness scan");
        return FreshnessReport::empty(start.elapsed().as_secs_f64());
    }

    // Scroll code-patterns and classify each point with a file_path
    let mut results: Vec<FreshnessResult> = Vec::new();
    let mut commit_count_cache: HashMap<String, u32> = HashMap::new();

    let filter = group_id.and_then(|g| must_filter(vec![field_eq("group_id", g)]));

    let mut offset: Option<PointId> = None;
    loop {
        let (points, next_offset) = match store
            .scroll(Collection::CodePatterns, filter.clone(), SCROLL_PAGE, offset)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "freshness scan scroll failed");
                break;
            }
        };

        for point in &points {
            let Some(file_path) = payload_str(&point.payload, "file_path") else {
                continue;
            };
            let stored_at = payload_str(&point.payload, "stored_at").unwrap_or_default();
            let memory_type = payload_str(&point.payload, "type").unwrap_or_else(|| "unknown".into());
            let point_id = point
                .id
                .as_ref()
                .map(point_id_string)
                .unwrap_or_default();

            let Some(gt) = ground_truth_map.get(&file_path) else {
                results.push(FreshnessResult {
                    point_id,
                    file_path,
                    memory_type,
                    status: FreshnessTier::Unknown,
                    reason: "No code blob data for this file path".to_string(),
                    stored_at,
                    blob_hash_match: None,
                    commit_count: 0,
                });
                continue;
            };

            // Hash comparison needs a blob_hash on the memory itself;
            // points synced before blob propagation carry none and fall
            // through to commit counting.
            let blob_hash_match = payload_str(&point.payload, "blob_hash")
                .map(|h| h == gt.blob_hash);

            let cache_key = format!("{file_path}:{stored_at}");
            let commit_count = match commit_count_cache.get(&cache_key) {
                Some(count) => *count,
                None => {
                    let count = if stored_at.is_empty() {
                        0
                    } else {
                        count_commits_for_file(store, &file_path, &stored_at).await
                    };
                    commit_count_cache.insert(cache_key, count);
                    count
                }
            };

            let (status, reason) = classify_freshness(blob_hash_match, commit_count, config);
            results.push(FreshnessResult {
                point_id,
                file_path,
                memory_type,
                status,
                reason,
                stored_at,
                blob_hash_match,
                commit_count,
            });
        }

        match next_offset {
            Some(next) if !points.is_empty() => offset = Some(next),
            _ => break,
        }
    }

    update_freshness_payloads(store, &results).await;
    if let Err(e) = append_audit_log(config, &results) {
        warn!(error = %e, "freshness audit log write failed");
    }

    let duration = start.elapsed().as_secs_f64();
    let count_of = |tier: FreshnessTier| results.iter().filter(|r| r.status == tier).count();
    let report = FreshnessReport {
        total_checked: results.len(),
        fresh_count: count_of(FreshnessTier::Fresh),
        aging_count: count_of(FreshnessTier::Aging),
        stale_count: count_of(FreshnessTier::Stale),
        expired_count: count_of(FreshnessTier::Expired),
        unknown_count: count_of(FreshnessTier::Unknown),
        duration_seconds: duration,
        results,
        timestamp: now_iso(),
    };

    info!(
        total = report.total_checked,
        fresh = report.fresh_count,
        aging = report.aging_count,
        stale = report.stale_count,
        expired = report.expired_count,
        unknown = report.unknown_count,
        duration_seconds = duration,
        "freshness scan complete"
    );

    report
}

/// Batch payload updates, grouped by classified status. A failed group is
/// logged and skipped; the scan is not aborted.
async fn update_freshness_payloads(store: &VectorStore, results: &[FreshnessResult]) {
    let checked_at = now_iso();
    let mut by_status: HashMap<&'static str, Vec<PointId>> = HashMap::new();
    for result in results {
        by_status
            .entry(result.status.as_str())
            .or_default()
            .push(PointId::from(result.point_id.clone()));
    }

    for (status, point_ids) in by_status {
        let mut payload: HashMap<String, QdrantValue> = HashMap::new();
        payload.insert("freshness_status".to_string(), status.into());
        payload.insert("freshness_checked_at".to_string(), checked_at.clone().into());

        if let Err(e) = store
            .set_payload(Collection::CodePatterns, point_ids, payload)
            .await
        {
            warn!(status, error = %e, "freshness payload update failed for group");
        }
    }
}

/// Append one JSONL audit line per scanned point.
fn append_audit_log(config: &MemoryConfig, results: &[FreshnessResult]) -> std::io::Result<()> {
    let log_dir: PathBuf = config.audit_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("freshness-log.jsonl");

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let timestamp = now_iso();
    for result in results {
        let line = serde_json::json!({
            "timestamp": timestamp,
            "point_id": result.point_id,
            "file_path": result.file_path,
            "status": result.status.as_str(),
            "reason": result.reason,
            "commit_count": result.commit_count,
        });
        writeln!(file, "{line}")?;
    }
    Ok(())
}

fn payload_str(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| match &v.kind {
        Some(qdrant_client::qdrant::value::Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    })
}

fn payload_list(payload: &HashMap<String, QdrantValue>, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(|v| match &v.kind {
            Some(qdrant_client::qdrant::value::Kind::ListValue(list)) => Some(
                list.values
                    .iter()
                    .filter_map(|item| match &item.kind {
                        Some(qdrant_client::qdrant::value::Kind::StringValue(s)) => Some(s.clone()),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default()
}

fn point_id_string(id: &PointId) -> String {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    match &id.point_id_options {
        Some(PointIdOptions::Uuid(u)) => u.clone(),
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_mismatch_is_expired() {
        let config = MemoryConfig::default();
        let (tier, reason) = classify_freshness(Some(false), 0, &config);
        assert_eq!(tier, FreshnessTier::Expired);
        assert!(reason.contains("Blob hash mismatch"));
    }

    #[test]
    fn test_commit_thresholds() {
        let config = MemoryConfig::default();
        // Defaults: aging 3, stale 5, expired 10
        assert_eq!(classify_freshness(None, 0, &config).0, FreshnessTier::Fresh);
        assert_eq!(classify_freshness(None, 2, &config).0, FreshnessTier::Fresh);
        assert_eq!(classify_freshness(None, 3, &config).0, FreshnessTier::Aging);
        assert_eq!(classify_freshness(None, 5, &config).0, FreshnessTier::Stale);
        assert_eq!(classify_freshness(None, 10, &config).0, FreshnessTier::Expired);
        assert_eq!(classify_freshness(None, 50, &config).0, FreshnessTier::Expired);
    }

    #[test]
    fn test_hash_match_with_high_churn_still_expires() {
        let config = MemoryConfig::default();
        let (tier, reason) = classify_freshness(Some(true), 20, &config);
        assert_eq!(tier, FreshnessTier::Expired);
        assert!(reason.contains("content matches"));
    }

    #[test]
    fn test_tier_priority_order() {
        let config = MemoryConfig::default();
        // Explicit mismatch beats a low commit count
        assert_eq!(classify_freshness(Some(false), 1, &config).0, FreshnessTier::Expired);
    }
}
