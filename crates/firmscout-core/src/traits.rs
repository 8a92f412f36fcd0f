use std::future::Future;

use crate::error::AppError;
use crate::models::{FetchRequest, PageAnalysis, ScrapeResult};

/// Retrieves page content for a URL, trying whatever techniques it owns.
///
/// Implementations never return `Err`: fetch failure is expressed as
/// `ScrapeResult { success: false, .. }` so a single bad page can never
/// abort a crawl by accident.
pub trait Scraper: Send + Sync + Clone {
    fn scrape(&self, request: FetchRequest) -> impl Future<Output = ScrapeResult> + Send;
}

/// External AI analysis capability: given page text, return structured data
/// and navigation suggestions.
///
/// `firm_context` is the firm name, optionally extended with a research
/// focus by the caller; implementations put it verbatim in front of the
/// model.
///
/// Treated as a black box with no assumed latency or availability. Callers
/// must tolerate `Err` (the crawl controller treats it as a zero-entity
/// page) and implementations must parse model output defensively.
pub trait Analyzer: Send + Sync + Clone {
    fn analyze(
        &self,
        page_text: &str,
        firm_context: &str,
    ) -> impl Future<Output = Result<PageAnalysis, AppError>> + Send;
}
