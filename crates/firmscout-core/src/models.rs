//! Data model: fetch requests/results, extracted entities, analyzer payload,
//! and the crawl report.
//!
//! The analyzer payload ([`PageAnalysis`]) is deserialized defensively: every
//! field carries a default so a partial or sloppily-shaped response degrades
//! to "nothing extracted" instead of failing the page.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

/// Fetch technique used (or requested) for a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Direct JSON/GraphQL endpoint call discovered from the page.
    ApiIntercept,
    /// Plain HTTP GET with browser-like headers.
    Static,
    /// Pooled headless browser with scroll + load-more interaction.
    Browser,
    /// Browser tier with anti-detection launch flags, domain-gated.
    StealthBrowser,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::ApiIntercept => write!(f, "api-intercept"),
            Strategy::Static => write!(f, "static"),
            Strategy::Browser => write!(f, "browser"),
            Strategy::StealthBrowser => write!(f, "stealth-browser"),
        }
    }
}

/// One page-fetch request. Ephemeral: built per attempt, consumed by the
/// scraper cascade.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    /// Force a specific tier instead of the default cascade order.
    pub hint: Option<Strategy>,
    /// Per-request timeout override for the static tier.
    pub timeout: Option<Duration>,
    pub use_cache: bool,
    /// TTL for caching a successful result. `None` uses the scraper default.
    pub cache_ttl: Option<Duration>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            hint: None,
            timeout: None,
            use_cache: true,
            cache_ttl: None,
        }
    }

    pub fn with_hint(mut self, hint: Strategy) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}

/// Outcome of one page fetch. Immutable once produced; also usable standalone
/// by single-page extraction flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub success: bool,
    pub url: String,
    pub html: Option<String>,
    pub text: Option<String>,
    pub strategy: Option<Strategy>,
    pub duration_ms: u64,
    pub cached: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl ScrapeResult {
    pub fn failure(url: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            url: url.into(),
            html: None,
            text: None,
            strategy: None,
            duration_ms,
            cached: false,
            status_code: None,
            error: Some(error.into()),
        }
    }
}

/// Priority of a suggested URL. Orders high before medium before low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A team member extracted from a page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamMember {
    pub name: String,
    pub title: Option<String>,
    pub email: Option<String>,
    pub linkedin_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
}

/// A portfolio company extracted from a page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioCompany {
    pub name: String,
    pub description: Option<String>,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub stage: Option<String>,
}

/// A URL the analyzer suggests visiting next.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestedUrl {
    pub url: String,
    pub reason: Option<String>,
    pub priority: Priority,
    pub expected_content: Option<String>,
}

/// Structured analysis of one page, as returned by the analyzer capability.
///
/// `has_more_content` / `load_more_selector` are advisory metadata: collected
/// into the report path but not auto-consumed for follow-up pagination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PageAnalysis {
    pub team_members: Vec<TeamMember>,
    pub portfolio_companies: Vec<PortfolioCompany>,
    pub firm_description: Option<String>,
    pub suggested_urls: Vec<SuggestedUrl>,
    pub has_more_content: bool,
    pub load_more_selector: Option<String>,
    pub notes: Option<String>,
}

/// Counters accumulated over one crawl.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub total_pages_visited: u32,
    pub max_depth_reached: u32,
}

/// Final output of one crawl, handed to the owning job runner.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub id: Uuid,
    pub firm_name: String,
    pub success: bool,
    pub team_members: Vec<TeamMember>,
    pub portfolio_companies: Vec<PortfolioCompany>,
    pub firm_description: Option<String>,
    pub stats: CrawlStats,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Entity merge
// ---------------------------------------------------------------------------

fn fill_if_empty(slot: &mut Option<String>, value: Option<String>) {
    let incoming_has_value = value.as_deref().is_some_and(|v| !v.trim().is_empty());
    let slot_is_empty = slot.as_deref().is_none_or(|v| v.trim().is_empty());
    if slot_is_empty && incoming_has_value {
        *slot = value;
    }
}

impl TeamMember {
    /// Merge `other` into `self`: only fields still empty are filled.
    /// First non-empty value wins across visits.
    pub fn merge(&mut self, other: TeamMember) {
        fill_if_empty(&mut self.title, other.title);
        fill_if_empty(&mut self.email, other.email);
        fill_if_empty(&mut self.linkedin_url, other.linkedin_url);
        fill_if_empty(&mut self.bio, other.bio);
        fill_if_empty(&mut self.location, other.location);
    }
}

impl PortfolioCompany {
    pub fn merge(&mut self, other: PortfolioCompany) {
        fill_if_empty(&mut self.description, other.description);
        fill_if_empty(&mut self.website, other.website);
        fill_if_empty(&mut self.industry, other.industry);
        fill_if_empty(&mut self.stage, other.stage);
    }
}

/// Identity key for entity dedup: lowercase, trimmed, single-spaced name.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// URL normalization and hashing
// ---------------------------------------------------------------------------

/// Canonical form of a URL for the visited set and cache keys: fragment
/// dropped, trailing slash stripped. `https://x.com` and `https://x.com/`
/// normalize identically.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    url.set_fragment(None);
    Some(url.as_str().trim_end_matches('/').to_string())
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_url_strips_trailing_slash_and_fragment() {
        assert_eq!(
            normalize_url("https://x.com/"),
            Some("https://x.com".to_string())
        );
        assert_eq!(
            normalize_url("https://x.com"),
            Some("https://x.com".to_string())
        );
        assert_eq!(
            normalize_url("https://x.com/team/#partners"),
            Some("https://x.com/team".to_string())
        );
        assert_eq!(normalize_url("not a url"), None);
    }

    #[test]
    fn normalize_url_is_idempotent() {
        let once = normalize_url("https://Example.com/Team/").unwrap();
        let twice = normalize_url(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_name_collapses_case_and_spaces() {
        assert_eq!(normalize_name("  Jane   Doe "), "jane doe");
        assert_eq!(normalize_name("JANE DOE"), "jane doe");
    }

    #[test]
    fn member_merge_fills_only_empty_fields() {
        let mut a = TeamMember {
            name: "Jane Doe".into(),
            title: Some("Partner".into()),
            email: None,
            ..Default::default()
        };
        a.merge(TeamMember {
            name: "Jane Doe".into(),
            title: Some("Managing Partner".into()),
            email: Some("jane@fund.com".into()),
            ..Default::default()
        });
        assert_eq!(a.title.as_deref(), Some("Partner"));
        assert_eq!(a.email.as_deref(), Some("jane@fund.com"));
    }

    #[test]
    fn merge_treats_whitespace_as_empty() {
        let mut a = TeamMember {
            name: "Jane".into(),
            title: Some("  ".into()),
            ..Default::default()
        };
        a.merge(TeamMember {
            name: "Jane".into(),
            title: Some("Partner".into()),
            ..Default::default()
        });
        assert_eq!(a.title.as_deref(), Some("Partner"));
    }

    #[test]
    fn priority_orders_high_first() {
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
    }

    #[test]
    fn page_analysis_defaults_on_missing_fields() {
        let analysis: PageAnalysis = serde_json::from_str("{}").unwrap();
        assert!(analysis.team_members.is_empty());
        assert!(analysis.suggested_urls.is_empty());
        assert!(!analysis.has_more_content);
    }

    #[test]
    fn page_analysis_tolerates_partial_entities() {
        let analysis: PageAnalysis = serde_json::from_str(
            r#"{"team_members": [{"name": "Jane Doe"}], "suggested_urls": [{"url": "https://x.com/team", "priority": "high"}]}"#,
        )
        .unwrap();
        assert_eq!(analysis.team_members[0].name, "Jane Doe");
        assert!(analysis.team_members[0].title.is_none());
        assert_eq!(analysis.suggested_urls[0].priority, Priority::High);
    }

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(compute_hash("hello"), compute_hash("world"));
    }
}
