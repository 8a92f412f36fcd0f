pub mod analyzer;
pub mod browser;
pub mod interceptor;
pub mod robots;
pub mod scraper;
pub mod static_fetcher;
pub mod text;

pub use analyzer::OpenAiAnalyzer;
pub use browser::{BrowserPool, BrowserPoolConfig, DynamicFetchConfig, DynamicFetcher};
pub use interceptor::ApiInterceptor;
pub use robots::RobotsGuard;
pub use scraper::{SiteScraper, SiteScraperConfig};
pub use static_fetcher::StaticFetcher;
pub use text::TextExtractor;
