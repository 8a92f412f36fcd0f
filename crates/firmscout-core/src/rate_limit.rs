//! Per-domain request rate limiting for polite fetching.
//!
//! Each domain gets a sliding 1-second window of request timestamps. A
//! caller at capacity waits until the oldest timestamp ages out of the
//! window (plus a small buffer), then proceeds. Waiting is FIFO through the
//! window mutex; this is the sole backpressure mechanism between the crawl
//! and a target site.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use url::Url;

const WINDOW: Duration = Duration::from_secs(1);

/// Configuration for the domain rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per domain within the trailing 1-second window.
    pub requests_per_second: u32,

    /// Safety margin added to each computed wait.
    pub buffer: Duration,
}

impl Default for RateLimitConfig {
    /// 2 requests/second with a 100ms buffer, conservative enough for
    /// small-business sites that throttle aggressively.
    fn default() -> Self {
        Self {
            requests_per_second: 2,
            buffer: Duration::from_millis(100),
        }
    }
}

/// Sliding-window rate limiter keyed by domain.
///
/// Windows are created lazily and persist for the process lifetime. Safe to
/// share across tasks; waits for one domain do not block other domains.
#[derive(Clone)]
pub struct DomainRateLimiter {
    config: RateLimitConfig,
    windows: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl DomainRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Extract the domain key from a URL (scheme://host:port).
    pub fn domain_key(url_str: &str) -> Option<String> {
        let url = Url::parse(url_str).ok()?;
        let host = url.host_str()?;
        let port = url
            .port_or_known_default()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{}{}", url.scheme(), host, port))
    }

    /// Wait until the domain's window admits another request, then record
    /// the request timestamp.
    pub async fn acquire(&self, domain: &str) {
        loop {
            let wait = {
                let mut map = self.windows.lock().await;
                let window = map.entry(domain.to_string()).or_default();
                let now = Instant::now();

                while let Some(&front) = window.front() {
                    if now.duration_since(front) > WINDOW {
                        window.pop_front();
                    } else {
                        break;
                    }
                }

                if window.len() < self.config.requests_per_second as usize {
                    window.push_back(now);
                    return;
                }

                // Oldest entry is guaranteed present: len >= rate >= 1.
                let oldest = *window.front().unwrap_or(&now);
                WINDOW.saturating_sub(now.duration_since(oldest)) + self.config.buffer
            };

            tracing::debug!(
                domain = %domain,
                wait_ms = %wait.as_millis(),
                "Rate limit window full, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Current number of in-window timestamps for a domain (diagnostics).
    pub async fn window_len(&self, domain: &str) -> usize {
        let map = self.windows.lock().await;
        map.get(domain).map_or(0, VecDeque::len)
    }
}

impl Default for DomainRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_key_extracts_correctly() {
        assert_eq!(
            DomainRateLimiter::domain_key("https://example.com/path?q=1"),
            Some("https://example.com:443".to_string())
        );
        assert_eq!(
            DomainRateLimiter::domain_key("http://example.com:8080/page"),
            Some("http://example.com:8080".to_string())
        );
        assert_eq!(DomainRateLimiter::domain_key("not-a-url"), None);
    }

    #[tokio::test]
    async fn requests_below_rate_are_not_delayed() {
        let limiter = DomainRateLimiter::new(RateLimitConfig {
            requests_per_second: 3,
            buffer: Duration::from_millis(100),
        });

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire("https://example.com:443").await;
        }
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(limiter.window_len("https://example.com:443").await, 3);
    }

    #[tokio::test]
    async fn request_over_rate_waits_for_window() {
        let limiter = DomainRateLimiter::new(RateLimitConfig {
            requests_per_second: 2,
            buffer: Duration::from_millis(100),
        });

        let start = Instant::now();
        limiter.acquire("https://example.com:443").await;
        limiter.acquire("https://example.com:443").await;
        // Third request within the same second must wait for the window.
        limiter.acquire("https://example.com:443").await;
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(900),
            "third request should have waited, elapsed: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn domains_do_not_block_each_other() {
        let limiter = DomainRateLimiter::new(RateLimitConfig {
            requests_per_second: 1,
            buffer: Duration::from_millis(100),
        });

        let start = Instant::now();
        limiter.acquire("https://a.com:443").await;
        limiter.acquire("https://b.com:443").await;
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
