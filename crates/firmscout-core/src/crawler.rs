//! Depth/page-bounded crawl controller.
//!
//! Drives the scraper one URL at a time, hands page text to the analyzer,
//! merges extracted entities across pages, and enqueues suggested URLs
//! until the crawl budget is exhausted. Strictly sequential within one
//! crawl: entity merges happen in visit order, so "first non-empty value
//! wins" is deterministic given the priority + discovery-order queue.
//!
//! Per-page failures (fetch or analysis) accumulate into the report's
//! `errors` list and never abort the crawl.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::models::{
    CrawlReport, CrawlStats, FetchRequest, PageAnalysis, PortfolioCompany, Priority, TeamMember,
    normalize_name, normalize_url,
};
use crate::traits::{Analyzer, Scraper};

/// Budget and pacing parameters for one crawl.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Maximum suggestion-chain length from the seed.
    pub max_depth: u32,

    /// Maximum pages fetched-and-analyzed.
    pub max_pages: u32,

    /// Free-form research focus, folded into the context string handed to
    /// the analyzer alongside the firm name.
    pub goal: Option<String>,

    /// Politeness delay between consecutive page visits.
    pub delay_between_pages: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_pages: 10,
            goal: None,
            delay_between_pages: Duration::ZERO,
        }
    }
}

impl CrawlConfig {
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_pages(mut self, pages: u32) -> Self {
        self.max_pages = pages;
        self
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_between_pages = delay;
        self
    }
}

/// Pending visit. Ordered by priority (high first), then discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueEntry {
    url: String,
    depth: u32,
    priority: Priority,
    seq: u64,
    expected_content: Option<String>,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest entry; invert so the smallest
        // (priority, seq) key comes out first.
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Accumulates entities across pages, preserving first-seen order and
/// merging by normalized name with first-non-empty-field-wins precedence.
#[derive(Default)]
struct EntityAccumulator {
    members: Vec<TeamMember>,
    member_index: HashMap<String, usize>,
    companies: Vec<PortfolioCompany>,
    company_index: HashMap<String, usize>,
    firm_description: Option<String>,
}

impl EntityAccumulator {
    fn absorb(&mut self, analysis: PageAnalysis) {
        for member in analysis.team_members {
            let key = normalize_name(&member.name);
            if key.is_empty() {
                continue;
            }
            match self.member_index.get(&key) {
                Some(&i) => self.members[i].merge(member),
                None => {
                    self.member_index.insert(key, self.members.len());
                    self.members.push(member);
                }
            }
        }

        for company in analysis.portfolio_companies {
            let key = normalize_name(&company.name);
            if key.is_empty() {
                continue;
            }
            match self.company_index.get(&key) {
                Some(&i) => self.companies[i].merge(company),
                None => {
                    self.company_index.insert(key, self.companies.len());
                    self.companies.push(company);
                }
            }
        }

        if self.firm_description.is_none()
            && let Some(desc) = analysis.firm_description
            && !desc.trim().is_empty()
        {
            self.firm_description = Some(desc);
        }
    }
}

/// Sequential crawl state machine over a scraper and an analyzer.
#[derive(Clone)]
pub struct Crawler<S, A>
where
    S: Scraper,
    A: Analyzer,
{
    scraper: S,
    analyzer: A,
    config: CrawlConfig,
}

impl<S, A> Crawler<S, A>
where
    S: Scraper,
    A: Analyzer,
{
    pub fn new(scraper: S, analyzer: A, config: CrawlConfig) -> Self {
        Self {
            scraper,
            analyzer,
            config,
        }
    }

    /// Run a crawl to completion with no external cancellation.
    pub async fn crawl(&self, seed_urls: &[String], firm_name: &str) -> CrawlReport {
        self.crawl_with_cancel(seed_urls, firm_name, CancellationToken::new())
            .await
    }

    /// Run a crawl, stopping cleanly between pages when `cancel` fires.
    pub async fn crawl_with_cancel(
        &self,
        seed_urls: &[String],
        firm_name: &str,
        cancel: CancellationToken,
    ) -> CrawlReport {
        let crawl_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(
            %crawl_id,
            firm = %firm_name,
            max_depth = self.config.max_depth,
            max_pages = self.config.max_pages,
            "Starting crawl"
        );

        let firm_context = match self.config.goal.as_deref() {
            Some(goal) => format!("{firm_name} (research focus: {goal})"),
            None => firm_name.to_string(),
        };

        let mut queue: BinaryHeap<QueueEntry> = BinaryHeap::new();
        let mut queued: HashSet<String> = HashSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut seq: u64 = 0;

        let mut errors: Vec<String> = Vec::new();
        let mut entities = EntityAccumulator::default();
        let mut stats = CrawlStats::default();
        let mut analyzed_pages: u32 = 0;
        let mut first_fetch_succeeded: Option<bool> = None;

        for seed in seed_urls {
            match normalize_url(seed) {
                Some(url) if queued.insert(url.clone()) => {
                    queue.push(QueueEntry {
                        url,
                        depth: 0,
                        priority: Priority::High,
                        seq,
                        expected_content: None,
                    });
                    seq += 1;
                }
                Some(_) => {}
                None => errors.push(format!("invalid seed URL: {seed}")),
            }
        }

        while let Some(entry) = queue.pop() {
            if stats.total_pages_visited >= self.config.max_pages {
                tracing::info!(%crawl_id, "Page budget exhausted");
                break;
            }
            if cancel.is_cancelled() {
                tracing::info!(%crawl_id, "Crawl cancelled");
                errors.push("crawl cancelled".to_string());
                break;
            }
            if !visited.insert(entry.url.clone()) {
                continue;
            }

            tracing::info!(
                %crawl_id,
                url = %entry.url,
                depth = entry.depth,
                priority = ?entry.priority,
                "Visiting page"
            );

            let result = self.scraper.scrape(FetchRequest::new(&entry.url)).await;
            if first_fetch_succeeded.is_none() {
                first_fetch_succeeded = Some(result.success);
            }

            if !result.success {
                let reason = result.error.unwrap_or_else(|| "unknown error".to_string());
                tracing::warn!(%crawl_id, url = %entry.url, error = %reason, "Fetch failed");
                errors.push(format!("fetch {}: {}", entry.url, reason));
                self.pause_between_pages(&cancel).await;
                continue;
            }

            stats.total_pages_visited += 1;
            stats.max_depth_reached = stats.max_depth_reached.max(entry.depth);

            let text = result.text.or(result.html).unwrap_or_default();
            if text.trim().is_empty() {
                errors.push(format!("fetch {}: empty page content", entry.url));
                self.pause_between_pages(&cancel).await;
                continue;
            }

            match self.analyzer.analyze(&text, &firm_context).await {
                Ok(analysis) => {
                    analyzed_pages += 1;

                    if analysis.has_more_content {
                        // Advisory only: recorded, not auto-consumed for
                        // follow-up pagination.
                        tracing::debug!(
                            %crawl_id,
                            url = %entry.url,
                            selector = ?analysis.load_more_selector,
                            "Analyzer reports more content behind pagination"
                        );
                    }

                    let suggestions = analysis.suggested_urls.clone();
                    entities.absorb(analysis);

                    if entry.depth + 1 <= self.config.max_depth {
                        for suggestion in suggestions {
                            let Some(url) = resolve_suggestion(&entry.url, &suggestion.url) else {
                                continue;
                            };
                            if visited.contains(&url) || !queued.insert(url.clone()) {
                                continue;
                            }
                            tracing::debug!(
                                %crawl_id,
                                url = %url,
                                priority = ?suggestion.priority,
                                expected = ?suggestion.expected_content,
                                "Enqueueing suggested URL"
                            );
                            queue.push(QueueEntry {
                                url,
                                depth: entry.depth + 1,
                                priority: suggestion.priority,
                                seq,
                                expected_content: suggestion.expected_content,
                            });
                            seq += 1;
                        }
                    }
                }
                Err(e) => {
                    // Malformed/unavailable analyzer output: zero-entity page.
                    tracing::warn!(%crawl_id, url = %entry.url, error = %e, "Analysis failed");
                    errors.push(format!("analyze {}: {}", entry.url, e));
                }
            }

            if !queue.is_empty() && stats.total_pages_visited < self.config.max_pages {
                self.pause_between_pages(&cancel).await;
            }
        }

        let success = match first_fetch_succeeded {
            Some(true) => true,
            Some(false) => analyzed_pages > 0,
            None => false,
        };

        tracing::info!(
            %crawl_id,
            pages = stats.total_pages_visited,
            members = entities.members.len(),
            companies = entities.companies.len(),
            errors = errors.len(),
            success,
            "Crawl finished"
        );

        CrawlReport {
            id: crawl_id,
            firm_name: firm_name.to_string(),
            success,
            team_members: entities.members,
            portfolio_companies: entities.companies,
            firm_description: entities.firm_description,
            stats,
            errors,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn pause_between_pages(&self, cancel: &CancellationToken) {
        if self.config.delay_between_pages.is_zero() {
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(self.config.delay_between_pages) => {}
            () = cancel.cancelled() => {}
        }
    }
}

/// Resolve a suggested URL, joining relative paths against the page it was
/// found on, and normalize it for the visited set.
fn resolve_suggestion(base: &str, suggestion: &str) -> Option<String> {
    let suggestion = suggestion.trim();
    if suggestion.is_empty() {
        return None;
    }
    if let Some(url) = normalize_url(suggestion) {
        return Some(url);
    }
    let base = Url::parse(base).ok()?;
    let joined = base.join(suggestion).ok()?;
    normalize_url(joined.as_str())
}
