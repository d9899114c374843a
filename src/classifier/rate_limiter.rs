// src/classifier/rate_limiter.rs
// Per-provider token bucket for classifier cost control
//
// A denied request is not queued: it is an immediate fallback trigger in
// the provider chain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

/// Average requests allowed per minute per provider
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;

/// Burst size (bucket capacity)
const DEFAULT_BURST_SIZE: u32 = 10;

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Token-bucket limiter with one bucket per provider name.
pub struct ProviderRateLimiter {
    refill_rate: f64,
    burst_size: f64,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl Default for ProviderRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_MINUTE, DEFAULT_BURST_SIZE)
    }
}

impl ProviderRateLimiter {
    pub fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        Self {
            refill_rate: requests_per_minute as f64 / 60.0,
            burst_size: burst_size as f64,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    fn bucket(&self, provider: &str) -> Arc<Mutex<Bucket>> {
        if let Ok(buckets) = self.buckets.read() {
            if let Some(bucket) = buckets.get(provider) {
                return bucket.clone();
            }
        }
        let Ok(mut buckets) = self.buckets.write() else {
            return Arc::new(Mutex::new(self.fresh_bucket()));
        };
        buckets
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(self.fresh_bucket())))
            .clone()
    }

    fn fresh_bucket(&self) -> Bucket {
        Bucket {
            capacity: self.burst_size,
            tokens: self.burst_size,
            refill_rate: self.refill_rate,
            last_refill: Instant::now(),
        }
    }

    /// Non-blocking check: consume one token if available.
    pub fn allow_request(&self, provider: &str) -> bool {
        let bucket = self.bucket(provider);
        let Ok(mut bucket) = bucket.lock() else {
            return true;
        };
        bucket.refill();

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            debug!(provider, remaining = bucket.tokens, "rate limit allowed");
            true
        } else {
            let wait = (1.0 - bucket.tokens) / bucket.refill_rate;
            warn!(provider, wait_seconds = wait, "rate limit exceeded");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_allowed() {
        let limiter = ProviderRateLimiter::new(60, 10);
        for _ in 0..10 {
            assert!(limiter.allow_request("ollama"));
        }
    }

    #[test]
    fn test_exceeding_burst_denied() {
        let limiter = ProviderRateLimiter::new(60, 3);
        assert!(limiter.allow_request("ollama"));
        assert!(limiter.allow_request("ollama"));
        assert!(limiter.allow_request("ollama"));
        assert!(!limiter.allow_request("ollama"));
    }

    #[test]
    fn test_buckets_are_per_provider() {
        let limiter = ProviderRateLimiter::new(60, 1);
        assert!(limiter.allow_request("a"));
        assert!(!limiter.allow_request("a"));
        assert!(limiter.allow_request("b"));
    }

    #[test]
    fn test_refill_restores_tokens() {
        // 600 rpm = 10 tokens/second: ~150ms restores at least one
        let limiter = ProviderRateLimiter::new(600, 1);
        assert!(limiter.allow_request("a"));
        assert!(!limiter.allow_request("a"));
        std::thread::sleep(std::time::Duration::from_millis(150));
        assert!(limiter.allow_request("a"));
    }
}
