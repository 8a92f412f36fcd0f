pub mod cache;
pub mod circuit_breaker;
pub mod crawler;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod request_manager;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use cache::TtlCache;
pub use circuit_breaker::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use crawler::{CrawlConfig, Crawler};
pub use error::AppError;
pub use models::{
    CrawlReport, CrawlStats, FetchRequest, PageAnalysis, PortfolioCompany, Priority, ScrapeResult,
    Strategy, SuggestedUrl, TeamMember, compute_hash, normalize_name, normalize_url,
};
pub use rate_limit::{DomainRateLimiter, RateLimitConfig};
pub use request_manager::{RequestManager, RequestManagerConfig};
pub use traits::{Analyzer, Scraper};
