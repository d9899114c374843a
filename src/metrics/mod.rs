// src/metrics/mod.rs
// Fire-and-forget metric pushes
//
// Each push spawns a short-lived detached child process (this binary's
// hidden push-metric subcommand) that performs the HTTP push with a
// sub-second timeout. The hot path never waits on the gateway and never
// sees its failures.

pub mod trace;

use crate::config::MemoryConfig;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Push gateway job name
const JOB_NAME: &str = "ai_memory_hooks";

/// Budget for the child's HTTP push
const PUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Closed label-value sets; anything else is coerced to "unknown"
const VALID_STATUS: &[&str] = &[
    "success", "failed", "timeout", "empty", "stored", "queued", "duplicate",
];
const VALID_OUTCOME: &[&str] = &["unique", "duplicate"];
const VALID_COMPONENT: &[&str] = &["embedding", "qdrant", "classifier", "sdk", "hook"];
const VALID_COLLECTION: &[&str] = &["code-patterns", "conventions", "discussions", "jira-data"];
const VALID_QUEUE_STATUS: &[&str] = &["pending", "exhausted", "ready"];

/// One metric sample bound for the push gateway. Serialized into the
/// child process's argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPush {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    pub gateway_url: String,
}

impl MetricPush {
    /// Prometheus text exposition body for this sample
    pub fn to_exposition(&self) -> String {
        let labels = self
            .labels
            .iter()
            .map(|(k, v)| format!("{k}=\"{}\"", v.replace('"', "")))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "# TYPE {name} gauge\n{name}{{{labels}}} {value}\n",
            name = self.name,
            labels = labels,
            value = self.value
        )
    }
}

static UNKNOWN_LABELS_LOGGED: Lazy<Mutex<HashSet<String>>> =
    Lazy::new(|| Mutex::new(HashSet::new()));

/// Validate a label value against its closed set; unknown values are
/// coerced to "unknown" and logged once per (label, value).
fn validate_label(label: &str, value: &str, allowed: &[&str]) -> String {
    if allowed.contains(&value) {
        return value.to_string();
    }
    let key = format!("{label}:{value}");
    if let Ok(mut logged) = UNKNOWN_LABELS_LOGGED.lock() {
        if logged.insert(key) {
            warn!(label, value, "unknown metric label value coerced");
        }
    }
    "unknown".to_string()
}

/// Keep project labels keyword-safe; they are open-ended but must not
/// break the exposition format.
fn sanitize_project(project: &str) -> String {
    let sanitized: String = project
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '-' })
        .collect();
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

/// Spawn the detached pusher child. Never blocks, never fails the caller.
fn spawn_push(config: &MemoryConfig, name: &str, labels: BTreeMap<String, String>, value: f64) {
    if !config.metrics_enabled {
        return;
    }

    let push = MetricPush {
        name: name.to_string(),
        labels,
        value,
        gateway_url: config.pushgateway_url.clone(),
    };
    let Ok(payload) = serde_json::to_string(&push) else {
        return;
    };
    let Ok(exe) = std::env::current_exe() else {
        return;
    };

    match Command::new(exe)
        .arg("push-metric")
        .arg(&payload)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(_) => debug!(metric = name, "metric push spawned"),
        Err(e) => debug!(metric = name, error = %e, "metric push spawn failed"),
    }
}

/// Perform the actual HTTP push. Runs inside the detached child.
pub async fn perform_push(push: &MetricPush) -> bool {
    let client = reqwest::Client::builder()
        .timeout(PUSH_TIMEOUT)
        .build()
        .unwrap_or_default();
    let url = format!(
        "{}/metrics/job/{JOB_NAME}",
        push.gateway_url.trim_end_matches('/')
    );
    match client.post(&url).body(push.to_exposition()).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Hook execution latency (target < 500ms)
pub fn push_hook_duration(config: &MemoryConfig, hook: &str, project: &str, seconds: f64) {
    let labels = BTreeMap::from([
        ("hook".to_string(), hook.to_string()),
        ("project".to_string(), sanitize_project(project)),
    ]);
    spawn_push(config, "aimemory_hook_duration_seconds", labels, seconds);
}

/// Retrieval counter and latency
pub fn push_retrieval(config: &MemoryConfig, collection: &str, status: &str, seconds: f64) {
    let collection = validate_label("collection", collection, VALID_COLLECTION);
    let status = validate_label("status", status, VALID_STATUS);
    let labels = BTreeMap::from([
        ("collection".to_string(), collection.clone()),
        ("status".to_string(), status),
    ]);
    spawn_push(config, "aimemory_retrievals_total", labels, 1.0);

    let duration_labels = BTreeMap::from([("collection".to_string(), collection)]);
    spawn_push(
        config,
        "aimemory_retrieval_duration_seconds",
        duration_labels,
        seconds,
    );
}

/// Embedding request outcome
pub fn push_embedding(config: &MemoryConfig, status: &str, seconds: f64) {
    let status = validate_label("status", status, VALID_STATUS);
    let labels = BTreeMap::from([("status".to_string(), status)]);
    spawn_push(config, "aimemory_embedding_requests_total", labels, 1.0);
    spawn_push(
        config,
        "aimemory_embedding_duration_seconds",
        BTreeMap::new(),
        seconds,
    );
}

/// Classification outcome per provider
pub fn push_classification(config: &MemoryConfig, provider: &str, success: bool, seconds: f64) {
    let status = if success { "success" } else { "failed" };
    let labels = BTreeMap::from([
        ("provider".to_string(), sanitize_project(provider)),
        ("status".to_string(), status.to_string()),
    ]);
    spawn_push(config, "aimemory_classifications_total", labels, 1.0);
    spawn_push(
        config,
        "aimemory_classification_duration_seconds",
        BTreeMap::from([("provider".to_string(), sanitize_project(provider))]),
        seconds,
    );
}

/// Capture outcome per collection
pub fn push_capture(config: &MemoryConfig, collection: &str, status: &str, project: &str) {
    let labels = BTreeMap::from([
        ("collection".to_string(), validate_label("collection", collection, VALID_COLLECTION)),
        ("status".to_string(), validate_label("status", status, VALID_STATUS)),
        ("project".to_string(), sanitize_project(project)),
    ]);
    spawn_push(config, "aimemory_captures_total", labels, 1.0);
}

/// Content-hash dedupe outcome
pub fn push_dedup_outcome(config: &MemoryConfig, outcome: &str, project: &str) {
    let labels = BTreeMap::from([
        ("outcome".to_string(), validate_label("outcome", outcome, VALID_OUTCOME)),
        ("project".to_string(), sanitize_project(project)),
    ]);
    spawn_push(config, "aimemory_dedup_outcomes_total", labels, 1.0);
}

/// Retry queue gauge, one sample per status
pub fn push_queue_size(config: &MemoryConfig, pending: usize, exhausted: usize, ready: usize) {
    for (status, value) in [("pending", pending), ("exhausted", exhausted), ("ready", ready)] {
        let labels = BTreeMap::from([(
            "status".to_string(),
            validate_label("queue_status", status, VALID_QUEUE_STATUS),
        )]);
        spawn_push(config, "aimemory_queue_size", labels, value as f64);
    }
}

/// Failure event for alerting
pub fn push_failure_event(config: &MemoryConfig, component: &str, error_code: &str) {
    let labels = BTreeMap::from([
        ("component".to_string(), validate_label("component", component, VALID_COMPONENT)),
        ("error_code".to_string(), sanitize_project(error_code)),
    ]);
    spawn_push(config, "aimemory_failure_events_total", labels, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposition_format() {
        let push = MetricPush {
            name: "aimemory_queue_size".to_string(),
            labels: BTreeMap::from([("status".to_string(), "pending".to_string())]),
            value: 3.0,
            gateway_url: "http://localhost:9091".to_string(),
        };
        let body = push.to_exposition();
        assert!(body.contains("# TYPE aimemory_queue_size gauge"));
        assert!(body.contains("aimemory_queue_size{status=\"pending\"} 3"));
    }

    #[test]
    fn test_validate_label_coerces_unknown() {
        assert_eq!(validate_label("status", "stored", VALID_STATUS), "stored");
        assert_eq!(validate_label("status", "weird", VALID_STATUS), "unknown");
    }

    #[test]
    fn test_sanitize_project() {
        assert_eq!(sanitize_project("my-project"), "my-project");
        assert_eq!(sanitize_project("has spaces!"), "has-spaces-");
        assert_eq!(sanitize_project(""), "unknown");
    }

    #[test]
    fn test_push_round_trip_serialization() {
        let push = MetricPush {
            name: "m".to_string(),
            labels: BTreeMap::new(),
            value: 1.5,
            gateway_url: "http://x".to_string(),
        };
        let json = serde_json::to_string(&push).unwrap();
        let restored: MetricPush = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.name, "m");
        assert_eq!(restored.value, 1.5);
    }

    #[test]
    fn test_disabled_metrics_no_spawn() {
        // metrics_enabled defaults to false; this must be a no-op
        let config = MemoryConfig::default();
        push_failure_event(&config, "embedding", "EMBEDDING_TIMEOUT");
    }
}
