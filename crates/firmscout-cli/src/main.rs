use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use firmscout_client::{OpenAiAnalyzer, SiteScraper, SiteScraperConfig};
use firmscout_core::crawler::{CrawlConfig, Crawler};
use firmscout_core::models::{FetchRequest, Strategy};

const DEEP_MAX_DEPTH: u32 = 3;
const DEEP_MAX_PAGES: u32 = 25;

#[derive(Parser)]
#[command(name = "firmscout", version, about = "AI-assisted investment firm website scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a firm's website and extract team, portfolio, and description
    Crawl {
        /// Seed URL(s), usually the firm's homepage
        #[arg(short, long, required = true)]
        url: Vec<String>,

        /// Firm name, used to steer the analyzer
        #[arg(short, long)]
        firm: String,

        /// Research focus forwarded to the analyzer (e.g. "fintech deals")
        #[arg(short, long)]
        goal: Option<String>,

        /// Maximum suggestion-chain depth from the seed
        #[arg(long)]
        max_depth: Option<u32>,

        /// Maximum pages to fetch and analyze
        #[arg(long)]
        max_pages: Option<u32>,

        /// Raise the budgets for a thorough profile (depth 3, 25 pages)
        #[arg(long, default_value_t = false)]
        deep: bool,

        /// Delay between page visits, in milliseconds
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,

        /// Analyzer model (e.g. "gpt-4o-mini", "gemini-2.5-flash")
        #[arg(short, long, env = "FIRMSCOUT_MODEL")]
        model: String,

        /// OpenAI-compatible API base URL
        #[arg(
            short,
            long,
            env = "FIRMSCOUT_BASE_URL",
            default_value = "https://api.openai.com/v1"
        )]
        base_url: String,

        /// API key (reads from FIRMSCOUT_API_KEY env var if not provided)
        #[arg(short, long, env = "FIRMSCOUT_API_KEY")]
        api_key: String,

        /// Skip the scrape cache
        #[arg(long, default_value_t = false)]
        no_cache: bool,

        /// Probe JSON/GraphQL endpoints before scraping markup
        #[arg(long, default_value_t = false)]
        intercept_apis: bool,

        /// Check robots.txt before every fetch
        #[arg(long, default_value_t = false)]
        respect_robots: bool,

        /// Host(s) allowed to escalate to the stealth browser tier
        #[arg(long)]
        stealth_host: Vec<String>,

        /// Allow fetching private/reserved IPs
        #[arg(long, default_value_t = false)]
        allow_private: bool,
    },

    /// Fetch a single page through the strategy cascade
    Fetch {
        /// Target URL
        #[arg(short, long)]
        url: String,

        /// Force a strategy: api, static, browser, or stealth
        #[arg(short, long)]
        strategy: Option<String>,

        /// Skip the scrape cache
        #[arg(long, default_value_t = false)]
        no_cache: bool,

        /// Probe JSON/GraphQL endpoints before scraping markup
        #[arg(long, default_value_t = false)]
        intercept_apis: bool,

        /// Allow fetching private/reserved IPs
        #[arg(long, default_value_t = false)]
        allow_private: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs to stderr so stdout stays JSON-clean
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("firmscout=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl {
            url,
            firm,
            goal,
            max_depth,
            max_pages,
            deep,
            delay_ms,
            model,
            base_url,
            api_key,
            no_cache,
            intercept_apis,
            respect_robots,
            stealth_host,
            allow_private,
        } => {
            let defaults = CrawlConfig::default();
            let crawl_config = CrawlConfig {
                max_depth: max_depth.unwrap_or(if deep { DEEP_MAX_DEPTH } else { defaults.max_depth }),
                max_pages: max_pages.unwrap_or(if deep { DEEP_MAX_PAGES } else { defaults.max_pages }),
                goal,
                delay_between_pages: Duration::from_millis(delay_ms),
            };
            let scraper_config = SiteScraperConfig {
                intercept_apis,
                respect_robots,
                stealth_hosts: stealth_host.into_iter().collect::<HashSet<_>>(),
                allow_private_urls: allow_private,
                bypass_cache: no_cache,
                ..SiteScraperConfig::default()
            };

            cmd_crawl(
                url,
                &firm,
                crawl_config,
                scraper_config,
                &model,
                &base_url,
                &api_key,
            )
            .await
        }
        Commands::Fetch {
            url,
            strategy,
            no_cache,
            intercept_apis,
            allow_private,
        } => {
            let hint = strategy.as_deref().map(parse_strategy).transpose()?;
            let scraper_config = SiteScraperConfig {
                intercept_apis,
                allow_private_urls: allow_private,
                ..SiteScraperConfig::default()
            };
            cmd_fetch(&url, hint, no_cache, scraper_config).await
        }
    }
}

fn parse_strategy(name: &str) -> Result<Strategy> {
    match name {
        "api" => Ok(Strategy::ApiIntercept),
        "static" => Ok(Strategy::Static),
        "browser" => Ok(Strategy::Browser),
        "stealth" => Ok(Strategy::StealthBrowser),
        other => bail!("unknown strategy '{other}' (expected api, static, browser, or stealth)"),
    }
}

/// Cancel the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing current page");
            token.cancel();
        }
    });
    cancel
}

#[allow(clippy::too_many_arguments)]
async fn cmd_crawl(
    seeds: Vec<String>,
    firm: &str,
    crawl_config: CrawlConfig,
    scraper_config: SiteScraperConfig,
    model: &str,
    base_url: &str,
    api_key: &str,
) -> Result<()> {
    let scraper = SiteScraper::new(scraper_config).context("Failed to set up scraper")?;
    let analyzer = OpenAiAnalyzer::with_base_url(api_key, model, base_url)
        .context("Failed to set up analyzer")?;

    let cache_sweeper = scraper.spawn_cache_sweeper(Duration::from_secs(300));
    let pool_sweeper = scraper
        .browser_pool()
        .spawn_idle_sweeper(Duration::from_secs(300));

    let crawler = Crawler::new(scraper.clone(), analyzer, crawl_config);

    let cancel = cancel_on_ctrl_c();
    let report = crawler.crawl_with_cancel(&seeds, firm, cancel).await;

    cache_sweeper.abort();
    pool_sweeper.abort();
    scraper.browser_pool().shutdown().await;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );

    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_fetch(
    url: &str,
    hint: Option<Strategy>,
    no_cache: bool,
    scraper_config: SiteScraperConfig,
) -> Result<()> {
    let scraper = SiteScraper::new(scraper_config).context("Failed to set up scraper")?;

    let mut request = FetchRequest::new(url);
    if let Some(strategy) = hint {
        request = request.with_hint(strategy);
    }
    if no_cache {
        request = request.no_cache();
    }

    let result = firmscout_core::traits::Scraper::scrape(&scraper, request).await;
    scraper.browser_pool().shutdown().await;

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to serialize result")?
    );

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
