//! Resilient execution wrapper for raw fetch attempts.
//!
//! Combines the per-domain [`DomainRateLimiter`] and the per-URL
//! [`BreakerRegistry`] around a single attempt closure, with optional
//! exponential-backoff retries. The fetch-strategy cascade calls this with
//! `max_attempts = 1`; fallback across strategies is the cascade's job,
//! not this layer's.

use std::future::Future;
use std::time::Duration;

use crate::circuit_breaker::{BreakerRegistry, CircuitBreakerConfig, CircuitBreakerStats};
use crate::error::AppError;
use crate::rate_limit::{DomainRateLimiter, RateLimitConfig};

/// Configuration for the request manager.
#[derive(Debug, Clone)]
pub struct RequestManagerConfig {
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,

    /// Base unit for retry backoff: the delay before attempt `n + 1` is
    /// `backoff_base * 2^n`. Shrunk in tests to keep them fast.
    pub backoff_base: Duration,
}

impl Default for RequestManagerConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// Process-wide resilience layer: one instance is shared by every fetch
/// path so rate windows and breaker state are consistent across crawls.
#[derive(Clone)]
pub struct RequestManager {
    limiter: DomainRateLimiter,
    breakers: BreakerRegistry,
    backoff_base: Duration,
}

impl RequestManager {
    pub fn new(config: RequestManagerConfig) -> Self {
        Self {
            limiter: DomainRateLimiter::new(config.rate_limit),
            breakers: BreakerRegistry::new(config.circuit_breaker),
            backoff_base: config.backoff_base,
        }
    }

    /// Handle to the shared per-domain limiter, for callers that issue
    /// side-channel requests (e.g. endpoint probes) outside [`execute`].
    ///
    /// [`execute`]: Self::execute
    pub fn limiter(&self) -> DomainRateLimiter {
        self.limiter.clone()
    }

    /// True if the breaker for this URL key is currently open.
    pub fn is_circuit_open(&self, url_key: &str) -> bool {
        self.breakers.is_open(url_key)
    }

    /// Breaker snapshots for every URL seen so far.
    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.breakers.stats()
    }

    /// Execute `op` with rate limiting, circuit breaking, and up to
    /// `max_attempts` tries.
    ///
    /// Fails immediately with [`AppError::CircuitOpen`] when the URL's
    /// breaker is open, without consuming a rate-limit slot or a network
    /// attempt. Only errors classified by
    /// [`AppError::should_trip_circuit`] count against the breaker, and
    /// only [`AppError::is_retryable`] errors are retried.
    pub async fn execute<F, T, Fut>(
        &self,
        domain_key: &str,
        url_key: &str,
        max_attempts: u32,
        op: F,
    ) -> Result<T, AppError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let breaker = self.breakers.breaker(url_key);
        let max_attempts = max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if breaker.is_open() {
                return Err(AppError::CircuitOpen {
                    key: url_key.to_string(),
                    retry_after: breaker.retry_after().unwrap_or_default(),
                });
            }

            self.limiter.acquire(domain_key).await;

            match op().await {
                Ok(value) => {
                    breaker.record_success();
                    return Ok(value);
                }
                Err(e) => {
                    if e.should_trip_circuit() {
                        breaker.record_failure(&e);
                    }

                    let retryable = e.is_retryable();
                    tracing::debug!(
                        url = %url_key,
                        attempt = attempt + 1,
                        error = %e,
                        retryable,
                        "Fetch attempt failed"
                    );
                    last_error = Some(e);

                    if !retryable || attempt + 1 >= max_attempts {
                        break;
                    }

                    // Exponential backoff: base * 2^attempt before the next try.
                    let delay = self.backoff_base * 2u32.saturating_pow(attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::Generic("no attempts executed".into())))
    }
}

impl Default for RequestManager {
    fn default() -> Self {
        Self::new(RequestManagerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;

    fn fast_config() -> RequestManagerConfig {
        RequestManagerConfig {
            rate_limit: RateLimitConfig {
                requests_per_second: 100,
                buffer: Duration::from_millis(1),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(60),
            },
            backoff_base: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn success_passes_through() {
        let rm = RequestManager::new(fast_config());
        let result = rm
            .execute("https://x.com:443", "https://x.com/a", 1, || async {
                Ok::<_, AppError>(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_up_to_max_attempts() {
        let rm = RequestManager::new(fast_config());
        let calls = Arc::new(AtomicU32::new(0));

        let calls2 = calls.clone();
        let result: Result<(), _> = rm
            .execute("https://x.com:443", "https://x.com/a", 3, move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::NetworkError("refused".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_after_one_attempt() {
        let rm = RequestManager::new(fast_config());
        let calls = Arc::new(AtomicU32::new(0));

        let calls2 = calls.clone();
        let result: Result<(), _> = rm
            .execute("https://x.com:443", "https://x.com/a", 5, move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::ContentInsufficient {
                        url: "https://x.com/a".into(),
                        got: 10,
                        min: 100,
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::ContentInsufficient { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_without_calling_op() {
        let mut config = fast_config();
        config.circuit_breaker.failure_threshold = 2;
        let rm = RequestManager::new(config);

        for _ in 0..2 {
            let _: Result<(), _> = rm
                .execute("https://x.com:443", "https://x.com/a", 1, || async {
                    Err(AppError::Timeout(5))
                })
                .await;
        }
        assert!(rm.is_circuit_open("https://x.com/a"));

        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<(), _> = rm
            .execute("https://x.com:443", "https://x.com/a", 1, move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn breaker_is_per_url_not_per_domain() {
        let mut config = fast_config();
        config.circuit_breaker.failure_threshold = 1;
        let rm = RequestManager::new(config);

        let _: Result<(), _> = rm
            .execute("https://x.com:443", "https://x.com/broken", 1, || async {
                Err(AppError::Timeout(5))
            })
            .await;
        assert!(rm.is_circuit_open("https://x.com/broken"));

        let ok = rm
            .execute("https://x.com:443", "https://x.com/fine", 1, || async {
                Ok::<_, AppError>("ok")
            })
            .await;
        assert_eq!(ok.unwrap(), "ok");
    }

    #[tokio::test]
    async fn backoff_delays_grow_exponentially() {
        let mut config = fast_config();
        config.backoff_base = Duration::from_millis(20);
        let rm = RequestManager::new(config);

        // 3 attempts: delays of 20ms (2^0) and 40ms (2^1) between them.
        let start = Instant::now();
        let _: Result<(), _> = rm
            .execute("https://x.com:443", "https://x.com/a", 3, || async {
                Err(AppError::NetworkError("reset".into()))
            })
            .await;
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn success_resets_breaker_count() {
        let mut config = fast_config();
        config.circuit_breaker.failure_threshold = 2;
        let rm = RequestManager::new(config);

        let _: Result<(), _> = rm
            .execute("https://x.com:443", "https://x.com/a", 1, || async {
                Err(AppError::Timeout(5))
            })
            .await;
        let _ = rm
            .execute("https://x.com:443", "https://x.com/a", 1, || async {
                Ok::<_, AppError>(())
            })
            .await;
        let _: Result<(), _> = rm
            .execute("https://x.com:443", "https://x.com/a", 1, || async {
                Err(AppError::Timeout(5))
            })
            .await;

        assert!(!rm.is_circuit_open("https://x.com/a"));
    }
}
