// src/limiter/mod.rs
// Dual token bucket rate limiter guarding the upstream LLM
//
// Two buckets (requests per minute, tokens per minute) with continuous
// refill. Callers block in acquire() until both buckets can cover the
// request, bounded by a queue timeout and a queue-depth circuit breaker.

use crate::config::RateLimitConfig;
use crate::error::{MemoryError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Poll interval while waiting for refill; short so the timeout is
/// checked frequently.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Consecutive upstream failures before the breaker opens
const FAILURE_THRESHOLD: u32 = 5;

/// Breaker cooldown
const COOLDOWN: Duration = Duration::from_secs(60);

/// Utilization level that triggers an approaching-limit warning
const UTILIZATION_WARN: f64 = 0.8;

struct BucketState {
    available_requests: f64,
    available_tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, rpm_limit: f64, tpm_limit: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.available_requests =
            (self.available_requests + elapsed * rpm_limit / 60.0).min(rpm_limit);
        self.available_tokens = (self.available_tokens + elapsed * tpm_limit / 60.0).min(tpm_limit);
        self.last_refill = now;
    }

    /// Seconds until the request bucket has one token again. Used to size
    /// the wait; capped by the poll interval at the call site.
    fn time_until_available(&self, rpm_limit: f64) -> f64 {
        if self.available_requests < 1.0 {
            (1.0 - self.available_requests) / (rpm_limit / 60.0)
        } else {
            // Token bucket short by an unknown amount; poll
            POLL_INTERVAL.as_secs_f64()
        }
    }
}

#[derive(Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Decrements queue depth when an acquire exits, success or not.
struct DepthGuard<'a>(&'a AtomicUsize);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory queue for rate-limited requests.
///
/// No fairness guarantee across concurrent waiters beyond the mutex's own
/// ordering; callers must not depend on precise ordering.
pub struct RateLimitQueue {
    rpm_limit: f64,
    tpm_limit: f64,
    max_queue_depth: usize,
    queue_timeout: Duration,
    state: Mutex<BucketState>,
    queue_depth: AtomicUsize,
    breaker: StdMutex<BreakerState>,
}

impl RateLimitQueue {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            rpm_limit: config.requests_per_minute as f64,
            tpm_limit: config.tokens_per_minute as f64,
            max_queue_depth: config.max_queue_depth,
            queue_timeout: Duration::from_secs_f64(config.queue_timeout_seconds),
            state: Mutex::new(BucketState {
                available_requests: config.requests_per_minute as f64,
                available_tokens: config.tokens_per_minute as f64,
                last_refill: Instant::now(),
            }),
            queue_depth: AtomicUsize::new(0),
            breaker: StdMutex::new(BreakerState::default()),
        }
    }

    /// Current number of waiters (including callers inside acquire)
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::SeqCst)
    }

    /// Acquire permission to make one request costing `estimated_tokens`.
    ///
    /// Blocks until both buckets can cover the request. Fails fast with
    /// `QueueDepthExceeded` when too many callers are already waiting,
    /// `CircuitOpen` while the upstream breaker cools down, and
    /// `QueueTimeout` when the wait exceeds the configured budget.
    pub async fn acquire(&self, estimated_tokens: u32) -> Result<()> {
        let depth = self.queue_depth.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = DepthGuard(&self.queue_depth);

        if depth > self.max_queue_depth {
            warn!(depth, limit = self.max_queue_depth, "rate limit queue depth exceeded");
            return Err(MemoryError::QueueDepthExceeded {
                depth,
                limit: self.max_queue_depth,
            });
        }

        let start = Instant::now();
        let needed = estimated_tokens as f64;

        loop {
            if let Some(reason) = self.circuit_open_reason() {
                return Err(MemoryError::CircuitOpen(reason));
            }

            let wait = {
                let mut state = self.state.lock().await;
                state.refill(self.rpm_limit, self.tpm_limit);

                if state.available_requests >= 1.0 && state.available_tokens >= needed {
                    state.available_requests -= 1.0;
                    state.available_tokens -= needed;
                    debug!(
                        estimated_tokens,
                        remaining_requests = state.available_requests,
                        remaining_tokens = state.available_tokens,
                        "rate limit acquired"
                    );
                    return Ok(());
                }
                state.time_until_available(self.rpm_limit)
            };

            let elapsed = start.elapsed();
            if elapsed > self.queue_timeout {
                warn!(
                    elapsed_seconds = elapsed.as_secs_f64(),
                    timeout_seconds = self.queue_timeout.as_secs_f64(),
                    "rate limit queue timeout"
                );
                return Err(MemoryError::QueueTimeout(elapsed.as_secs_f64()));
            }

            let sleep_for = Duration::from_secs_f64(wait.max(0.0)).min(POLL_INTERVAL);
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Synchronise bucket state from upstream response headers
    /// (`*-ratelimit-requests-remaining`, `*-ratelimit-input-tokens-remaining`,
    /// `*-ratelimit-output-tokens-remaining`). Emits a warning when request
    /// utilization crosses 80%.
    pub async fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let requests_rem = header_suffix_f64(headers, "ratelimit-requests-remaining");
        let input_rem = header_suffix_f64(headers, "ratelimit-input-tokens-remaining");
        let output_rem = header_suffix_f64(headers, "ratelimit-output-tokens-remaining");

        if let Some(remaining) = requests_rem {
            let utilization = 1.0 - remaining / self.rpm_limit;
            if utilization > UTILIZATION_WARN {
                warn!(
                    requests_remaining = remaining,
                    requests_limit = self.rpm_limit,
                    utilization,
                    "rate limit approaching"
                );
            }
        }

        let mut state = self.state.lock().await;
        if let Some(remaining) = requests_rem {
            state.available_requests = remaining.min(self.rpm_limit);
        }
        if let (Some(input), Some(output)) = (input_rem, output_rem) {
            // Conservative estimate: the tighter of the two token budgets
            state.available_tokens = input.min(output).min(self.tpm_limit);
            debug!(
                available_requests = state.available_requests,
                available_tokens = state.available_tokens,
                "rate limit state synced from headers"
            );
        }
    }

    /// Record an upstream failure; opens the breaker after the threshold.
    pub fn record_failure(&self) {
        let Ok(mut breaker) = self.breaker.lock() else {
            return;
        };
        breaker.consecutive_failures += 1;
        if breaker.consecutive_failures >= FAILURE_THRESHOLD && breaker.open_until.is_none() {
            breaker.open_until = Some(Instant::now() + COOLDOWN);
            warn!(
                consecutive_failures = breaker.consecutive_failures,
                cooldown_seconds = COOLDOWN.as_secs(),
                "upstream circuit breaker opened"
            );
        }
    }

    /// Record an upstream success, clearing the breaker.
    pub fn record_success(&self) {
        let Ok(mut breaker) = self.breaker.lock() else {
            return;
        };
        breaker.consecutive_failures = 0;
        breaker.open_until = None;
    }

    fn circuit_open_reason(&self) -> Option<String> {
        let Ok(mut breaker) = self.breaker.lock() else {
            return None;
        };
        match breaker.open_until {
            Some(until) if Instant::now() < until => Some(format!(
                "{} consecutive upstream failures, cooling down",
                breaker.consecutive_failures
            )),
            Some(_) => {
                // Cooldown expired
                breaker.open_until = None;
                breaker.consecutive_failures = 0;
                None
            }
            None => None,
        }
    }
}

fn header_suffix_f64(headers: &reqwest::header::HeaderMap, suffix: &str) -> Option<f64> {
    headers.iter().find_map(|(name, value)| {
        if name.as_str().ends_with(suffix) {
            value.to_str().ok()?.parse::<f64>().ok()
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rpm: u32, tpm: u32, depth: usize, timeout: f64) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute: rpm,
            tokens_per_minute: tpm,
            max_queue_depth: depth,
            queue_timeout_seconds: timeout,
        }
    }

    #[tokio::test]
    async fn test_acquire_within_burst() {
        let limiter = RateLimitQueue::new(&config(60, 30_000, 10, 5.0));
        for _ in 0..5 {
            limiter.acquire(100).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let limiter = RateLimitQueue::new(&config(1, 30_000, 10, 0.3));
        limiter.acquire(10).await.unwrap();
        // Second request: bucket empty, refill is 1/min, timeout must fire
        let err = limiter.acquire(10).await.unwrap_err();
        assert!(matches!(err, MemoryError::QueueTimeout(_)));
    }

    #[tokio::test]
    async fn test_queue_depth_exceeded() {
        let limiter = std::sync::Arc::new(RateLimitQueue::new(&config(1, 30_000, 2, 2.0)));
        limiter.acquire(10).await.unwrap();

        // Two waiters allowed, the third over the limit fails fast
        let l1 = limiter.clone();
        let w1 = tokio::spawn(async move { l1.acquire(10).await });
        let l2 = limiter.clone();
        let w2 = tokio::spawn(async move { l2.acquire(10).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(limiter.queue_depth(), 2);

        let err = limiter.acquire(10).await.unwrap_err();
        assert!(matches!(err, MemoryError::QueueDepthExceeded { .. }));

        w1.abort();
        w2.abort();
    }

    #[tokio::test]
    async fn test_depth_returns_to_zero_after_exit() {
        let limiter = RateLimitQueue::new(&config(60, 30_000, 10, 5.0));
        limiter.acquire(10).await.unwrap();
        assert_eq!(limiter.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_failures() {
        let limiter = RateLimitQueue::new(&config(60, 30_000, 10, 5.0));
        for _ in 0..FAILURE_THRESHOLD {
            limiter.record_failure();
        }
        let err = limiter.acquire(10).await.unwrap_err();
        assert!(matches!(err, MemoryError::CircuitOpen(_)));

        limiter.record_success();
        limiter.acquire(10).await.unwrap();
    }

    #[tokio::test]
    async fn test_token_bucket_limits_by_tokens() {
        // Plenty of requests, tiny token budget
        let limiter = RateLimitQueue::new(&config(600, 100, 10, 0.3));
        limiter.acquire(100).await.unwrap();
        let err = limiter.acquire(100).await.unwrap_err();
        assert!(matches!(err, MemoryError::QueueTimeout(_)));
    }

    #[tokio::test]
    async fn test_update_from_headers_syncs_state() {
        let limiter = RateLimitQueue::new(&config(60, 30_000, 10, 0.2));
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("anthropic-ratelimit-requests-remaining", "0".parse().unwrap());
        headers.insert("anthropic-ratelimit-input-tokens-remaining", "10".parse().unwrap());
        headers.insert("anthropic-ratelimit-output-tokens-remaining", "20".parse().unwrap());
        limiter.update_from_headers(&headers).await;

        // Requests drained by header sync: next acquire must wait and time out
        let err = limiter.acquire(1).await.unwrap_err();
        assert!(matches!(err, MemoryError::QueueTimeout(_)));
    }
}
