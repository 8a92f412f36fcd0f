//! Multi-strategy fetch cascade.
//!
//! [`SiteScraper`] is the concrete [`Scraper`] implementation: robots gate,
//! cache lookup, then cheap strategies before expensive ones (API
//! interception, static GET, pooled browser, stealth browser), escalating on
//! failure or thin content. Every attempt runs through the
//! [`RequestManager`] with a single try; the cascade itself is the retry
//! mechanism.

use std::collections::HashSet;
use std::future::Future;
use std::time::{Duration, Instant};

use firmscout_core::cache::TtlCache;
use firmscout_core::error::AppError;
use firmscout_core::models::{FetchRequest, ScrapeResult, Strategy, compute_hash, normalize_url};
use firmscout_core::rate_limit::DomainRateLimiter;
use firmscout_core::request_manager::{RequestManager, RequestManagerConfig};
use firmscout_core::traits::Scraper;
use futures::StreamExt;
use url::Url;

use crate::browser::{BrowserPool, BrowserPoolConfig, DynamicFetchConfig, DynamicFetcher};
use crate::interceptor::ApiInterceptor;
use crate::robots::RobotsGuard;
use crate::static_fetcher::StaticFetcher;
use crate::text::TextExtractor;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 3600);
const MAX_BATCH_CONCURRENCY: usize = 3;

/// URL path segments that mark pages expected to carry substantial text.
const CONTENT_HEAVY_SEGMENTS: &[&str] = &[
    "team",
    "people",
    "about",
    "portfolio",
    "partners",
    "investments",
    "companies",
];

const ROBOTS_USER_AGENT: &str = "firmscout";

/// Configuration for the fetch cascade.
#[derive(Debug, Clone)]
pub struct SiteScraperConfig {
    /// TTL for cached scrape results.
    pub cache_ttl: Duration,

    /// Timeout for the static GET tier.
    pub static_timeout: Duration,

    /// Try API interception before static fetching.
    pub intercept_apis: bool,

    /// Check robots.txt before every fetch.
    pub respect_robots: bool,

    /// Hosts that escalate to the stealth browser tier.
    pub stealth_hosts: HashSet<String>,

    /// Allow fetching private/reserved IPs (CLI usage).
    pub allow_private_urls: bool,

    /// Ignore the cache for every request, regardless of per-request flags.
    pub bypass_cache: bool,

    pub request_manager: RequestManagerConfig,
    pub browser_pool: BrowserPoolConfig,
    pub dynamic_fetch: DynamicFetchConfig,
}

impl Default for SiteScraperConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            static_timeout: Duration::from_secs(5),
            intercept_apis: false,
            respect_robots: false,
            stealth_hosts: HashSet::new(),
            allow_private_urls: false,
            bypass_cache: false,
            request_manager: RequestManagerConfig::default(),
            browser_pool: BrowserPoolConfig::default(),
            dynamic_fetch: DynamicFetchConfig::default(),
        }
    }
}

#[derive(Clone)]
struct CachedPage {
    html: Option<String>,
    text: String,
    strategy: Strategy,
    status_code: Option<u16>,
}

struct TierOutput {
    html: Option<String>,
    text: String,
    status_code: Option<u16>,
}

/// The resilient multi-strategy scraper.
///
/// Cheap to clone; clones share the cache, browser pool, rate windows, and
/// breaker registry.
#[derive(Clone)]
pub struct SiteScraper {
    config: SiteScraperConfig,
    requests: RequestManager,
    cache: TtlCache<CachedPage>,
    static_fetcher: StaticFetcher,
    text: TextExtractor,
    dynamic: DynamicFetcher,
    interceptor: ApiInterceptor,
    robots: Option<RobotsGuard>,
}

impl SiteScraper {
    pub fn new(config: SiteScraperConfig) -> Result<Self, AppError> {
        let mut static_fetcher = StaticFetcher::with_timeout(config.static_timeout)?;
        if config.allow_private_urls {
            static_fetcher = static_fetcher.allow_private_urls();
        }

        let pool = BrowserPool::new(config.browser_pool.clone());
        let dynamic = DynamicFetcher::new(pool, config.dynamic_fetch.clone());

        let robots = if config.respect_robots {
            Some(RobotsGuard::new(ROBOTS_USER_AGENT)?)
        } else {
            None
        };

        let requests = RequestManager::new(config.request_manager.clone());
        let interceptor = ApiInterceptor::new(requests.limiter())?;

        Ok(Self {
            requests,
            cache: TtlCache::new(),
            static_fetcher,
            text: TextExtractor::new(),
            dynamic,
            interceptor,
            robots,
            config,
        })
    }

    /// The shared browser pool, for sweeper wiring and shutdown.
    pub fn browser_pool(&self) -> &BrowserPool {
        self.dynamic.pool()
    }

    /// Spawn the periodic cache eviction sweep. Abort the handle to stop it.
    pub fn spawn_cache_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        self.cache.spawn_sweeper(interval)
    }

    pub fn request_manager(&self) -> &RequestManager {
        &self.requests
    }

    /// Scrape an ordered batch with bounded concurrency. Concurrency is
    /// clamped to at most [`MAX_BATCH_CONCURRENCY`]; results come back in
    /// request order.
    pub async fn scrape_batch(
        &self,
        requests: Vec<FetchRequest>,
        concurrency: usize,
    ) -> Vec<ScrapeResult> {
        let concurrency = clamp_concurrency(concurrency);
        futures::stream::iter(requests)
            .map(|request| self.scrape_one(request))
            .buffered(concurrency)
            .collect()
            .await
    }

    async fn scrape_one(&self, request: FetchRequest) -> ScrapeResult {
        let started = Instant::now();
        let url = normalize_url(&request.url).unwrap_or_else(|| request.url.clone());
        let use_cache = request.use_cache && !self.config.bypass_cache;

        // Robots is checked before the cache so a disallowed URL is refused
        // even when an earlier run already cached it.
        if let Some(robots) = &self.robots
            && !robots.allowed(&url).await
        {
            return ScrapeResult::failure(
                &url,
                "robots.txt disallows this URL",
                started.elapsed().as_millis() as u64,
            );
        }

        let cache_key = compute_hash(&url);
        if use_cache
            && let Some(page) = self.cache.get(&cache_key).await
        {
            tracing::debug!(url = %url, "Cache hit");
            return ScrapeResult {
                success: true,
                url,
                html: page.html,
                text: Some(page.text),
                strategy: Some(page.strategy),
                duration_ms: started.elapsed().as_millis() as u64,
                cached: true,
                status_code: page.status_code,
                error: None,
            };
        }

        let Some(domain) = DomainRateLimiter::domain_key(&url) else {
            return ScrapeResult::failure(
                &url,
                format!("invalid URL: {url}"),
                started.elapsed().as_millis() as u64,
            );
        };

        let tiers = self.tier_order(&url, request.hint);
        let outcome = run_cascade(&self.requests, &domain, &url, &tiers, |strategy| {
            self.attempt(strategy, &url, request.timeout)
        })
        .await;

        match outcome {
            Ok((strategy, output)) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!(
                    url = %url,
                    strategy = %strategy,
                    chars = output.text.len(),
                    duration_ms,
                    "Fetch succeeded"
                );
                if use_cache {
                    let ttl = request.cache_ttl.unwrap_or(self.config.cache_ttl);
                    self.cache
                        .insert(
                            cache_key.clone(),
                            CachedPage {
                                html: output.html.clone(),
                                text: output.text.clone(),
                                strategy,
                                status_code: output.status_code,
                            },
                            ttl,
                        )
                        .await;
                }
                ScrapeResult {
                    success: true,
                    url,
                    html: output.html,
                    text: Some(output.text),
                    strategy: Some(strategy),
                    duration_ms,
                    cached: false,
                    status_code: output.status_code,
                    error: None,
                }
            }
            Err(e) => {
                ScrapeResult::failure(&url, e.to_string(), started.elapsed().as_millis() as u64)
            }
        }
    }

    fn tier_order(&self, url: &str, hint: Option<Strategy>) -> Vec<Strategy> {
        if let Some(strategy) = hint {
            return vec![strategy];
        }

        let stealth_gated = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .is_some_and(|host| self.config.stealth_hosts.contains(&host));

        plan_tiers(self.config.intercept_apis, stealth_gated)
    }

    async fn attempt(
        &self,
        strategy: Strategy,
        url: &str,
        timeout_override: Option<Duration>,
    ) -> Result<TierOutput, AppError> {
        let fut = self.attempt_inner(strategy, url);
        match timeout_override {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| AppError::Timeout(limit.as_secs()))?,
            None => fut.await,
        }
    }

    async fn attempt_inner(&self, strategy: Strategy, url: &str) -> Result<TierOutput, AppError> {
        match strategy {
            Strategy::ApiIntercept => {
                let page = self.static_fetcher.fetch(url).await?;
                let payload = self
                    .interceptor
                    .intercept(url, &page.html)
                    .await
                    .ok_or_else(|| AppError::Generic("no usable API endpoint".into()))?;
                Ok(TierOutput {
                    html: None,
                    text: payload.body,
                    status_code: Some(page.status_code),
                })
            }
            Strategy::Static => {
                let page = self.static_fetcher.fetch(url).await?;
                let text = self.text.extract(&page.html)?;
                let min = min_text_threshold(url);
                if text.trim().len() < min {
                    return Err(AppError::ContentInsufficient {
                        url: url.to_string(),
                        got: text.trim().len(),
                        min,
                    });
                }
                Ok(TierOutput {
                    html: Some(page.html),
                    text,
                    status_code: Some(page.status_code),
                })
            }
            Strategy::Browser | Strategy::StealthBrowser => {
                let stealth = strategy == Strategy::StealthBrowser;
                let html = self.dynamic.fetch(url, stealth).await?;
                let text = self.text.extract(&html)?;
                if text.trim().len() < 100 {
                    return Err(AppError::ContentInsufficient {
                        url: url.to_string(),
                        got: text.trim().len(),
                        min: 100,
                    });
                }
                Ok(TierOutput {
                    html: Some(html),
                    text,
                    status_code: None,
                })
            }
        }
    }
}

impl Scraper for SiteScraper {
    async fn scrape(&self, request: FetchRequest) -> ScrapeResult {
        self.scrape_one(request).await
    }
}

/// Walk the strategy tiers in order until one produces content.
///
/// Each tier runs through the [`RequestManager`] with a single try. An open
/// circuit aborts the walk immediately: no point burning browser time on a
/// URL the breaker already gave up on. Any other failure escalates to the
/// next tier; the last error is returned when every tier fails.
async fn run_cascade<F, Fut>(
    requests: &RequestManager,
    domain: &str,
    url: &str,
    tiers: &[Strategy],
    attempt: F,
) -> Result<(Strategy, TierOutput), AppError>
where
    F: Fn(Strategy) -> Fut,
    Fut: Future<Output = Result<TierOutput, AppError>>,
{
    let mut last_error: Option<AppError> = None;

    for &strategy in tiers {
        tracing::debug!(url = %url, strategy = %strategy, "Attempting fetch strategy");
        match requests.execute(domain, url, 1, || attempt(strategy)).await {
            Ok(output) => return Ok((strategy, output)),
            Err(e @ AppError::CircuitOpen { .. }) => {
                tracing::warn!(url = %url, error = %e, "Circuit open, aborting cascade");
                return Err(e);
            }
            Err(e) => {
                tracing::debug!(url = %url, strategy = %strategy, error = %e, "Strategy failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| AppError::Generic("no fetch strategy available".into())))
}

/// Strategy order for a URL with no hint.
fn plan_tiers(intercept_apis: bool, stealth_gated: bool) -> Vec<Strategy> {
    let mut tiers = Vec::with_capacity(4);
    if intercept_apis {
        tiers.push(Strategy::ApiIntercept);
    }
    tiers.push(Strategy::Static);
    tiers.push(Strategy::Browser);
    if stealth_gated {
        tiers.push(Strategy::StealthBrowser);
    }
    tiers
}

/// Static-tier content floor. Pages that should list people or companies
/// get a high bar so a JS-rendered shell escalates to the browser tier.
fn min_text_threshold(url: &str) -> usize {
    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default();
    let heavy = CONTENT_HEAVY_SEGMENTS
        .iter()
        .any(|segment| path.contains(segment));
    if heavy { 1000 } else { 100 }
}

fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(1, MAX_BATCH_CONCURRENCY)
}
