//! Hand-rolled mocks for crawl controller and cascade tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::error::AppError;
use crate::models::{FetchRequest, PageAnalysis, ScrapeResult, Strategy};
use crate::traits::{Analyzer, Scraper};

/// Build a successful static-strategy result with the given text.
pub fn page_ok(url: &str, text: &str) -> ScrapeResult {
    ScrapeResult {
        success: true,
        url: url.to_string(),
        html: Some(format!("<html><body>{text}</body></html>")),
        text: Some(text.to_string()),
        strategy: Some(Strategy::Static),
        duration_ms: 10,
        cached: false,
        status_code: Some(200),
        error: None,
    }
}

#[derive(Clone)]
enum ScraperDefault {
    Ok(String),
    Fail(String),
}

/// Scraper that serves canned results and records every URL it is asked
/// to fetch, in call order.
#[derive(Clone)]
pub struct MockScraper {
    default: ScraperDefault,
    pages: Arc<Mutex<HashMap<String, ScrapeResult>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockScraper {
    /// Every URL succeeds with the given page text unless overridden.
    pub fn always_ok(text: &str) -> Self {
        Self {
            default: ScraperDefault::Ok(text.to_string()),
            pages: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every URL fails with the given error unless overridden.
    pub fn always_failing(error: &str) -> Self {
        Self {
            default: ScraperDefault::Fail(error.to_string()),
            pages: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Override the result for one URL.
    pub fn with_page(self, url: &str, result: ScrapeResult) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), result);
        self
    }

    /// URLs fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

impl Scraper for MockScraper {
    async fn scrape(&self, request: FetchRequest) -> ScrapeResult {
        self.calls.lock().unwrap().push(request.url.clone());

        if let Some(result) = self.pages.lock().unwrap().get(&request.url) {
            return result.clone();
        }
        match &self.default {
            ScraperDefault::Ok(text) => page_ok(&request.url, text),
            ScraperDefault::Fail(error) => ScrapeResult::failure(&request.url, error, 10),
        }
    }
}

type AnalyzerFn = dyn Fn(&str, &str) -> Result<PageAnalysis, AppError> + Send + Sync;

#[derive(Clone)]
enum AnalyzerMode {
    Fixed(PageAnalysis),
    Sequence(Arc<Mutex<VecDeque<Result<PageAnalysis, AppError>>>>),
    Func(Arc<AnalyzerFn>),
}

/// Analyzer serving canned analyses. Records `(page_text, firm_context)`
/// pairs for call inspection.
#[derive(Clone)]
pub struct MockAnalyzer {
    mode: AnalyzerMode,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockAnalyzer {
    /// Returns an empty analysis for every page.
    pub fn empty() -> Self {
        Self::with_analysis(PageAnalysis::default())
    }

    /// Returns the same analysis for every page.
    pub fn with_analysis(analysis: PageAnalysis) -> Self {
        Self {
            mode: AnalyzerMode::Fixed(analysis),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns the queued results in order, then empty analyses.
    pub fn with_sequence(results: Vec<Result<PageAnalysis, AppError>>) -> Self {
        Self {
            mode: AnalyzerMode::Sequence(Arc::new(Mutex::new(results.into()))),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Computes each result from the page text and firm context.
    pub fn with_fn<F>(f: F) -> Self
    where
        F: Fn(&str, &str) -> Result<PageAnalysis, AppError> + Send + Sync + 'static,
    {
        Self {
            mode: AnalyzerMode::Func(Arc::new(f)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `(page_text, firm_context)` pairs seen so far, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Analyzer for MockAnalyzer {
    async fn analyze(&self, page_text: &str, firm_context: &str) -> Result<PageAnalysis, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((page_text.to_string(), firm_context.to_string()));

        match &self.mode {
            AnalyzerMode::Fixed(analysis) => Ok(analysis.clone()),
            AnalyzerMode::Sequence(queue) => queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(PageAnalysis::default())),
            AnalyzerMode::Func(f) => f(page_text, firm_context),
        }
    }
}
