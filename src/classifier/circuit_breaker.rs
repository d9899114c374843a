// src/classifier/circuit_breaker.rs
// Circuit breaker for classifier providers - stops hammering providers
// that are down and probes recovery after a cooldown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Consecutive failures before the circuit opens
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Seconds the circuit stays open before admitting test requests
const DEFAULT_RESET_TIMEOUT_SECS: u64 = 60;

/// Test requests admitted in the half-open state
const DEFAULT_HALF_OPEN_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct ProviderState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    last_success_time: Option<Instant>,
    half_open_attempts: u32,
}

impl Default for ProviderState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            last_success_time: None,
            half_open_attempts: 0,
        }
    }
}

/// Point-in-time circuit status for monitoring
#[derive(Debug, Clone)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

/// Per-provider three-state circuit breaker.
///
/// Entry creation uses a double-checked read/write lock so concurrent
/// first calls for the same provider produce exactly one state; per-
/// operation transitions run under the entry's own mutex.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout_secs: u64,
    half_open_max_attempts: u32,
    states: RwLock<HashMap<String, Arc<Mutex<ProviderState>>>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(
            DEFAULT_FAILURE_THRESHOLD,
            DEFAULT_RESET_TIMEOUT_SECS,
            DEFAULT_HALF_OPEN_MAX_ATTEMPTS,
        )
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout_secs: u64, half_open_max_attempts: u32) -> Self {
        Self {
            failure_threshold,
            reset_timeout_secs,
            half_open_max_attempts,
            states: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, provider: &str) -> Arc<Mutex<ProviderState>> {
        // Fast path: entry exists
        if let Ok(states) = self.states.read() {
            if let Some(state) = states.get(provider) {
                return state.clone();
            }
        }
        // Slow path: create under the write lock, re-checking first
        let Ok(mut states) = self.states.write() else {
            return Arc::new(Mutex::new(ProviderState::default()));
        };
        states
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ProviderState::default())))
            .clone()
    }

    /// Whether the provider may be called right now.
    ///
    /// Open circuits transition to half-open once the cooldown elapses;
    /// half-open circuits admit a bounded number of test requests.
    pub fn is_available(&self, provider: &str) -> bool {
        let entry = self.entry(provider);
        let Ok(mut state) = entry.lock() else {
            return true;
        };

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = state
                    .last_failure_time
                    .map(|t| t.elapsed().as_secs())
                    .unwrap_or(u64::MAX);
                if elapsed > self.reset_timeout_secs {
                    state.state = CircuitState::HalfOpen;
                    // The caller that observed the transition is the first
                    // test request
                    state.half_open_attempts = 1;
                    info!(provider, elapsed_seconds = elapsed, "circuit half-open");
                    true
                } else {
                    debug!(
                        provider,
                        remaining_seconds = self.reset_timeout_secs - elapsed,
                        "circuit open, request rejected"
                    );
                    false
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_attempts < self.half_open_max_attempts {
                    state.half_open_attempts += 1;
                    debug!(
                        provider,
                        attempt = state.half_open_attempts,
                        max_attempts = self.half_open_max_attempts,
                        "circuit half-open test request"
                    );
                    true
                } else {
                    warn!(provider, "circuit half-open attempts exhausted");
                    false
                }
            }
        }
    }

    /// Record a success: reset failures and close the circuit.
    pub fn record_success(&self, provider: &str) {
        let entry = self.entry(provider);
        let Ok(mut state) = entry.lock() else {
            return;
        };
        let prev = state.state;
        state.consecutive_failures = 0;
        state.last_success_time = Some(Instant::now());
        state.state = CircuitState::Closed;
        state.half_open_attempts = 0;
        if prev != CircuitState::Closed {
            info!(provider, previous = prev.as_str(), "circuit closed");
        }
    }

    /// Record a failure; opens the circuit at the threshold. A failure in
    /// half-open re-opens immediately.
    pub fn record_failure(&self, provider: &str, error_type: &str) {
        let entry = self.entry(provider);
        let Ok(mut state) = entry.lock() else {
            return;
        };
        state.consecutive_failures += 1;
        state.last_failure_time = Some(Instant::now());

        debug!(
            provider,
            consecutive_failures = state.consecutive_failures,
            error_type,
            "circuit failure recorded"
        );

        let should_open = match state.state {
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
            CircuitState::Closed => state.consecutive_failures >= self.failure_threshold,
        };
        if should_open && state.state != CircuitState::Open {
            state.state = CircuitState::Open;
            warn!(
                provider,
                failures = state.consecutive_failures,
                threshold = self.failure_threshold,
                timeout_seconds = self.reset_timeout_secs,
                "circuit opened"
            );
        }
    }

    /// Current status snapshot for monitoring.
    pub fn status(&self, provider: &str) -> CircuitStatus {
        let entry = self.entry(provider);
        match entry.lock() {
            Ok(state) => CircuitStatus {
                state: state.state,
                consecutive_failures: state.consecutive_failures,
            },
            Err(_) => CircuitStatus {
                state: CircuitState::Closed,
                consecutive_failures: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_provider_is_available() {
        let breaker = CircuitBreaker::default();
        assert!(breaker.is_available("ollama"));
    }

    #[test]
    fn test_threshold_failures_open_circuit() {
        let breaker = CircuitBreaker::default();
        for _ in 0..DEFAULT_FAILURE_THRESHOLD {
            breaker.record_failure("ollama", "timeout");
        }
        assert!(!breaker.is_available("ollama"));
        assert_eq!(breaker.status("ollama").state, CircuitState::Open);
    }

    #[test]
    fn test_below_threshold_stays_closed() {
        let breaker = CircuitBreaker::default();
        breaker.record_failure("ollama", "timeout");
        breaker.record_failure("ollama", "timeout");
        assert!(breaker.is_available("ollama"));
    }

    #[test]
    fn test_success_resets_counter() {
        let breaker = CircuitBreaker::default();
        for _ in 0..DEFAULT_FAILURE_THRESHOLD - 1 {
            breaker.record_failure("ollama", "timeout");
        }
        breaker.record_success("ollama");
        breaker.record_failure("ollama", "timeout");
        assert!(breaker.is_available("ollama"));
    }

    #[test]
    fn test_providers_are_independent() {
        let breaker = CircuitBreaker::default();
        for _ in 0..DEFAULT_FAILURE_THRESHOLD {
            breaker.record_failure("ollama", "connection");
        }
        assert!(!breaker.is_available("ollama"));
        assert!(breaker.is_available("claude"));
    }

    #[test]
    fn test_cooldown_transitions_to_half_open() {
        // Zero-second cooldown so the test does not sleep a minute
        let breaker = CircuitBreaker::new(2, 0, 3);
        breaker.record_failure("p", "timeout");
        breaker.record_failure("p", "timeout");
        assert_eq!(breaker.status("p").state, CircuitState::Open);

        std::thread::sleep(Duration::from_millis(1100));
        assert!(breaker.is_available("p"));
        assert_eq!(breaker.status("p").state, CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_admits_limited_attempts() {
        let breaker = CircuitBreaker::new(2, 0, 3);
        breaker.record_failure("p", "timeout");
        breaker.record_failure("p", "timeout");
        std::thread::sleep(Duration::from_millis(1100));

        // First availability check transitions Open -> HalfOpen and counts
        // as the first test request; two more are admitted.
        assert!(breaker.is_available("p"));
        assert!(breaker.is_available("p"));
        assert!(breaker.is_available("p"));
        assert!(!breaker.is_available("p"));
    }

    #[test]
    fn test_half_open_success_closes() {
        let breaker = CircuitBreaker::new(2, 0, 3);
        breaker.record_failure("p", "timeout");
        breaker.record_failure("p", "timeout");
        std::thread::sleep(Duration::from_millis(1100));
        assert!(breaker.is_available("p"));

        breaker.record_success("p");
        assert_eq!(breaker.status("p").state, CircuitState::Closed);
        assert!(breaker.is_available("p"));
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(2, 0, 3);
        breaker.record_failure("p", "timeout");
        breaker.record_failure("p", "timeout");
        std::thread::sleep(Duration::from_millis(1100));
        assert!(breaker.is_available("p"));

        breaker.record_failure("p", "timeout");
        assert_eq!(breaker.status("p").state, CircuitState::Open);
    }
}
