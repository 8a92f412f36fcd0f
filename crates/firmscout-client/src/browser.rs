//! Pooled headless-Chromium fetching via the Chrome DevTools Protocol.
//!
//! [`BrowserPool`] bounds the number of live Chromium processes and reuses
//! warm instances across fetches. [`DynamicFetcher`] drives one page to a
//! fully-rendered state: navigate, settle, scroll out lazy-loaded content,
//! click load-more controls, then capture the DOM.

use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};

use chromiumoxide::{Browser, BrowserConfig, Page};
use firmscout_core::error::AppError;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
];

const WINDOW_SIZES: &[(u32, u32)] = &[(1920, 1080), (1600, 900), (1440, 900), (1366, 768)];

/// Cheap pseudo-randomness for picking launch parameters. Seeded from the
/// clock; uniformity does not matter here.
fn xorshift_pick(len: usize) -> usize {
    let mut x = UNIX_EPOCH
        .elapsed()
        .unwrap_or_default()
        .subsec_nanos() as u64
        | 1;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    (x % len as u64) as usize
}

/// Configuration for the browser pool.
#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    /// Hard cap on live Chromium processes.
    pub max_instances: usize,

    /// An instance must sit idle this long before it is reused.
    pub min_idle_before_reuse: Duration,

    /// Give up acquiring after this long at capacity.
    pub acquire_timeout: Duration,

    /// Idle instances older than this are closed by the sweep task.
    pub close_idle_after: Duration,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            max_instances: 15,
            min_idle_before_reuse: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(120),
            close_idle_after: Duration::from_secs(300),
        }
    }
}

struct PoolEntry {
    id: Uuid,
    browser: Arc<Browser>,
    handler_task: JoinHandle<()>,
    stealth: bool,
    in_use: bool,
    last_used: Instant,
}

/// A checked-out browser. Return it with [`BrowserPool::release`].
pub struct PoolHandle {
    pub id: Uuid,
    pub browser: Arc<Browser>,
}

/// Bounded pool of Chromium instances, split into a normal and a stealth
/// tier. Stealth instances carry anti-automation-detection launch flags and
/// are never handed out for normal fetches (or vice versa).
#[derive(Clone)]
pub struct BrowserPool {
    config: BrowserPoolConfig,
    entries: Arc<Mutex<Vec<PoolEntry>>>,
}

impl BrowserPool {
    pub fn new(config: BrowserPoolConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Check out an instance for the requested tier: reuse a warm idle one,
    /// launch a new one under the cap, or wait for a release.
    pub async fn acquire(&self, stealth: bool) -> Result<PoolHandle, AppError> {
        let deadline = Instant::now() + self.config.acquire_timeout;

        loop {
            {
                let mut entries = self.entries.lock().await;

                if let Some(entry) = entries.iter_mut().find(|e| {
                    !e.in_use
                        && e.stealth == stealth
                        && e.last_used.elapsed() >= self.config.min_idle_before_reuse
                }) {
                    entry.in_use = true;
                    tracing::debug!(id = %entry.id, stealth, "Reusing pooled browser");
                    return Ok(PoolHandle {
                        id: entry.id,
                        browser: Arc::clone(&entry.browser),
                    });
                }

                if entries.len() < self.config.max_instances {
                    // Launch while holding the lock so the cap is strict.
                    let (browser, handler_task) = launch_browser(stealth).await?;
                    let id = Uuid::new_v4();
                    let browser = Arc::new(browser);
                    tracing::info!(%id, stealth, total = entries.len() + 1, "Launched browser");
                    entries.push(PoolEntry {
                        id,
                        browser: Arc::clone(&browser),
                        handler_task,
                        stealth,
                        in_use: true,
                        last_used: Instant::now(),
                    });
                    return Ok(PoolHandle { id, browser });
                }
            }

            if Instant::now() >= deadline {
                return Err(AppError::BrowserError(format!(
                    "Browser pool at capacity ({}) for {} seconds",
                    self.config.max_instances,
                    self.config.acquire_timeout.as_secs()
                )));
            }
            tracing::debug!(stealth, "Browser pool at capacity, waiting");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Return an instance to the pool. Bookkeeping only; the Chromium
    /// process stays warm for reuse.
    pub async fn release(&self, handle: PoolHandle) {
        drop(handle.browser);
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.id == handle.id) {
            entry.in_use = false;
            entry.last_used = Instant::now();
        }
    }

    /// Close idle instances older than the configured window.
    pub async fn sweep_idle(&self) {
        let stale = {
            let mut entries = self.entries.lock().await;
            let mut stale = Vec::new();
            let mut i = 0;
            while i < entries.len() {
                if !entries[i].in_use
                    && entries[i].last_used.elapsed() >= self.config.close_idle_after
                {
                    stale.push(entries.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            stale
        };

        for entry in stale {
            tracing::info!(id = %entry.id, "Closing idle browser");
            close_entry(entry).await;
        }
    }

    /// Spawn a background task running [`sweep_idle`](Self::sweep_idle)
    /// periodically. Abort the handle to stop it.
    pub fn spawn_idle_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                pool.sweep_idle().await;
            }
        })
    }

    /// Close every instance. In-use instances are closed too; callers must
    /// not hold handles across shutdown.
    pub async fn shutdown(&self) {
        let all = {
            let mut entries = self.entries.lock().await;
            std::mem::take(&mut *entries)
        };
        for entry in all {
            close_entry(entry).await;
        }
    }

    /// (live, in-use) instance counts for logging.
    pub async fn stats(&self) -> (usize, usize) {
        let entries = self.entries.lock().await;
        let in_use = entries.iter().filter(|e| e.in_use).count();
        (entries.len(), in_use)
    }
}

impl Default for BrowserPool {
    fn default() -> Self {
        Self::new(BrowserPoolConfig::default())
    }
}

async fn close_entry(entry: PoolEntry) {
    match Arc::into_inner(entry.browser) {
        Some(mut browser) => {
            if let Err(e) = browser.close().await {
                tracing::warn!(id = %entry.id, error = %e, "Browser close failed");
            }
            let _ = browser.wait().await;
        }
        // A handle is still outstanding; dropping our reference lets the
        // process die with the last handle.
        None => tracing::warn!(id = %entry.id, "Browser still referenced at close"),
    }
    entry.handler_task.abort();
}

async fn launch_browser(stealth: bool) -> Result<(Browser, JoinHandle<()>), AppError> {
    let ua = USER_AGENTS[xorshift_pick(USER_AGENTS.len())];
    let (width, height) = WINDOW_SIZES[xorshift_pick(WINDOW_SIZES.len())];

    let mut builder = BrowserConfig::builder()
        .no_sandbox()
        .arg("--headless=new")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-popup-blocking")
        .arg("--no-first-run")
        .arg(format!("--user-agent={ua}"))
        .arg(format!("--window-size={width},{height}"));

    if stealth {
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--lang=en-US,en");
    }

    let config = builder
        .build()
        .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

    // The CDP handler must be polled continuously for the connection to work.
    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                tracing::warn!("Browser CDP handler error: {event:?}");
                break;
            }
        }
    });

    Ok((browser, handler_task))
}

/// Interaction limits for one dynamic fetch.
#[derive(Debug, Clone)]
pub struct DynamicFetchConfig {
    pub nav_timeout: Duration,
    /// Settle time after navigation when no content selector matches fast.
    pub content_dwell: Duration,
    pub max_scroll_iterations: u32,
    pub scroll_settle: Duration,
    /// Stop scrolling after this many consecutive no-growth iterations.
    pub stable_scrolls_to_stop: u32,
    pub max_load_more_clicks: u32,
    pub click_settle: Duration,
}

impl Default for DynamicFetchConfig {
    fn default() -> Self {
        Self {
            nav_timeout: Duration::from_secs(30),
            content_dwell: Duration::from_secs(3),
            max_scroll_iterations: 15,
            scroll_settle: Duration::from_millis(1500),
            stable_scrolls_to_stop: 3,
            max_load_more_clicks: 20,
            click_settle: Duration::from_secs(2),
        }
    }
}

// Clicks one visible load-more style control, returns whether it clicked.
const CLICK_LOAD_MORE_JS: &str = r#"
(() => {
    const pattern = /\b(load more|show more|view all|see more|more team|more companies)\b/i;
    const candidates = document.querySelectorAll('button, a, [role="button"]');
    for (const el of candidates) {
        const text = (el.innerText || '').trim();
        if (!pattern.test(text)) continue;
        const rect = el.getBoundingClientRect();
        if (rect.width === 0 || rect.height === 0) continue;
        el.scrollIntoView({ block: 'center' });
        el.click();
        return true;
    }
    return false;
})()
"#;

/// Renders a page in a pooled browser and interacts it to completion.
#[derive(Clone)]
pub struct DynamicFetcher {
    pool: BrowserPool,
    config: DynamicFetchConfig,
}

impl DynamicFetcher {
    pub fn new(pool: BrowserPool, config: DynamicFetchConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &BrowserPool {
        &self.pool
    }

    /// Fetch the fully-rendered HTML for a URL on the given tier.
    pub async fn fetch(&self, url: &str, stealth: bool) -> Result<String, AppError> {
        let handle = self.pool.acquire(stealth).await?;
        let result = self.fetch_on(&handle.browser, url).await;
        self.pool.release(handle).await;
        result
    }

    async fn fetch_on(&self, browser: &Browser, url: &str) -> Result<String, AppError> {
        let page = tokio::time::timeout(self.config.nav_timeout, browser.new_page(url))
            .await
            .map_err(|_| AppError::Timeout(self.config.nav_timeout.as_secs()))?
            .map_err(|e| AppError::BrowserError(format!("Failed to navigate to {url}: {e}")))?;

        let result = self.render(&page, url).await;
        let _ = page.close().await;
        result
    }

    async fn render(&self, page: &Page, url: &str) -> Result<String, AppError> {
        // Wait for the body, then give client-side rendering a moment.
        if page.find_element("body").await.is_err() {
            tracing::debug!(url, "No body element yet, dwelling");
        }
        tokio::time::sleep(self.config.content_dwell).await;

        self.scroll_to_bottom(page, url).await;
        self.click_load_more(page, url).await;

        page.content()
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to read page content: {e}")))
    }

    /// Bounded infinite-scroll: keep scrolling until the document stops
    /// growing or the iteration cap is hit.
    async fn scroll_to_bottom(&self, page: &Page, url: &str) {
        let mut last_height: i64 = -1;
        let mut stable = 0u32;

        for iteration in 0..self.config.max_scroll_iterations {
            let height = match page
                .evaluate("document.body ? document.body.scrollHeight : 0")
                .await
                .and_then(|v| Ok(v.into_value::<i64>()?))
            {
                Ok(h) => h,
                Err(e) => {
                    tracing::debug!(url, error = %e, "Scroll height read failed");
                    return;
                }
            };

            if height == last_height {
                stable += 1;
                if stable >= self.config.stable_scrolls_to_stop {
                    tracing::debug!(url, iteration, "Page height stable, scroll done");
                    return;
                }
            } else {
                stable = 0;
                last_height = height;
            }

            if page
                .evaluate("window.scrollTo(0, document.body.scrollHeight)")
                .await
                .is_err()
            {
                return;
            }
            tokio::time::sleep(self.config.scroll_settle).await;
        }
    }

    /// Click load-more/show-more/view-all controls until none remain or the
    /// click cap is hit.
    async fn click_load_more(&self, page: &Page, url: &str) {
        for click in 0..self.config.max_load_more_clicks {
            let clicked = match page
                .evaluate(CLICK_LOAD_MORE_JS)
                .await
                .and_then(|v| Ok(v.into_value::<bool>()?))
            {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!(url, error = %e, "Load-more probe failed");
                    return;
                }
            };

            if !clicked {
                if click > 0 {
                    tracing::debug!(url, clicks = click, "Expanded load-more content");
                }
                return;
            }
            tokio::time::sleep(self.config.click_settle).await;
        }
        tracing::debug!(
            url,
            clicks = self.config.max_load_more_clicks,
            "Load-more click cap reached"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xorshift_pick_stays_in_bounds() {
        for _ in 0..100 {
            assert!(xorshift_pick(USER_AGENTS.len()) < USER_AGENTS.len());
            assert!(xorshift_pick(WINDOW_SIZES.len()) < WINDOW_SIZES.len());
        }
    }

    #[test]
    fn default_limits_match_interaction_budget() {
        let config = DynamicFetchConfig::default();
        assert_eq!(config.max_scroll_iterations, 15);
        assert_eq!(config.max_load_more_clicks, 20);
        assert_eq!(config.nav_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn empty_pool_reports_zero_stats() {
        let pool = BrowserPool::default();
        assert_eq!(pool.stats().await, (0, 0));
    }
}
