//! Per-URL circuit breaking for fetch resilience.
//!
//! State is tracked per URL rather than per domain, so other pages on a
//! recovering domain stay reachable while one persistently broken URL is
//! blocked.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures]--> OPEN (rejecting) --[timeout]--> HALF_OPEN (probing)
//!                                                                         |
//!                                       <--[failure]--                    |
//!                                                                         |
//! CLOSED <---------------------------[success]----------------------------+
//! ```
//!
//! The failure threshold defaults to 20: normal extraction traffic produces
//! bursts of benign 404s and timeouts, and opening early would block pages
//! that are merely slow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::AppError;

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected immediately.
    Open,
    /// One probe request is allowed to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration shared by every breaker in a registry.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Time to wait before transitioning from Open to Half-Open.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 20,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    last_error_message: Option<String>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            last_error_message: None,
        }
    }
}

/// Snapshot of one breaker's state for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub key: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Thread-safe circuit breaker for a single key.
#[derive(Clone)]
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            inner: Arc::new(Mutex::new(BreakerInner::new())),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.key, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the current state, handling lazy Open → HalfOpen transitions.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Remaining wait before a half-open probe is allowed, when open.
    pub fn retry_after(&self) -> Option<Duration> {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        if inner.state != CircuitState::Open {
            return None;
        }
        Some(match inner.last_failure_time {
            Some(t) => self.config.recovery_timeout.saturating_sub(t.elapsed()),
            None => self.config.recovery_timeout,
        })
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let time_until_half_open = self.retry_after();
        let inner = self.lock_inner();
        CircuitBreakerStats {
            key: self.key.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
        }
    }

    /// Any success resets the failure count and closes the circuit. A single
    /// half-open probe success is enough to close.
    pub fn record_success(&self) {
        let mut inner = self.lock_inner();
        if inner.state == CircuitState::HalfOpen {
            tracing::info!(circuit = %self.key, "Circuit breaker closing after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_error_message = None;
    }

    pub fn record_failure(&self, error: &AppError) {
        let mut inner = self.lock_inner();
        inner.last_failure_time = Some(Instant::now());
        inner.last_error_message = Some(error.to_string());

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.key,
                        failures = inner.failure_count,
                        error = %error,
                        "Circuit breaker opening"
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    circuit = %self.key,
                    error = %error,
                    "Circuit breaker probe failed, returning to open state"
                );
                inner.state = CircuitState::Open;
                inner.failure_count += 1;
            }
            CircuitState::Open => {}
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.key, "Circuit breaker manually reset");
        *inner = BreakerInner::new();
    }

    fn maybe_transition_to_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(last_failure) = inner.last_failure_time
            && last_failure.elapsed() >= self.config.recovery_timeout
        {
            tracing::info!(
                circuit = %self.key,
                "Circuit breaker transitioning to half-open state"
            );
            inner.state = CircuitState::HalfOpen;
        }
    }
}

/// Lazily-populated collection of per-key breakers, alive for the process
/// lifetime.
#[derive(Clone)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered breaker registry from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Get or create the breaker for a key.
    pub fn breaker(&self, key: &str) -> CircuitBreaker {
        let mut map = self.lock_map();
        map.entry(key.to_string())
            .or_insert_with(|| CircuitBreaker::new(key, self.config.clone()))
            .clone()
    }

    /// True if the breaker for this key exists and is open.
    pub fn is_open(&self, key: &str) -> bool {
        let map = self.lock_map();
        map.get(key).is_some_and(CircuitBreaker::is_open)
    }

    /// Snapshot stats for every tracked key.
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let map = self.lock_map();
        map.values().map(CircuitBreaker::stats).collect()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net_err() -> AppError {
        AppError::NetworkError("test".into())
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new("https://x.com/team", CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_at_default_threshold() {
        let cb = CircuitBreaker::new("k", CircuitBreakerConfig::default());
        for _ in 0..19 {
            cb.record_failure(&net_err());
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure(&net_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let config = CircuitBreakerConfig {
            failure_threshold: 5,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("k", config);

        for _ in 0..4 {
            cb.record_failure(&net_err());
        }
        cb.record_success();
        for _ in 0..4 {
            cb.record_failure(&net_err());
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 4);
    }

    #[test]
    fn test_circuit_transitions_to_half_open() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(10),
        };
        let cb = CircuitBreaker::new("k", config);

        cb.record_failure(&net_err());
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_closes_on_single_success() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(1),
        };
        let cb = CircuitBreaker::new("k", config);

        cb.record_failure(&net_err());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(1),
        };
        let cb = CircuitBreaker::new("k", config);

        cb.record_failure(&net_err());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure(&net_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_retry_after_reported_while_open() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        };
        let cb = CircuitBreaker::new("k", config);
        assert!(cb.retry_after().is_none());

        cb.record_failure(&net_err());
        let wait = cb.retry_after().unwrap();
        assert!(wait <= Duration::from_secs(60));
        assert!(wait > Duration::from_secs(55));
    }

    #[test]
    fn test_manual_reset() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(300),
        };
        let cb = CircuitBreaker::new("k", config);
        cb.record_failure(&net_err());
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_tracks_keys_independently() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        });

        let a = registry.breaker("https://x.com/team");
        a.record_failure(&net_err());
        a.record_failure(&net_err());

        assert!(registry.is_open("https://x.com/team"));
        assert!(!registry.is_open("https://x.com/about"));
        assert_eq!(registry.stats().len(), 1);
    }

    #[test]
    fn test_registry_returns_same_breaker_instance() {
        let registry = BreakerRegistry::default();
        let a = registry.breaker("k");
        a.record_failure(&net_err());
        let b = registry.breaker("k");
        assert_eq!(b.stats().failure_count, 1);
    }
}
