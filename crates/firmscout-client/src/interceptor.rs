//! JSON/GraphQL endpoint discovery and probing.
//!
//! Many team and portfolio pages render from a JSON payload the site also
//! serves directly. Before paying for a browser render, this pass scans the
//! cheap static HTML for likely data endpoints and probes them; a hit
//! yields structured text far cleaner than scraped markup. Probes count
//! against the same per-domain rate window as regular fetches.

use std::time::Duration;

use firmscout_core::error::AppError;
use firmscout_core::rate_limit::DomainRateLimiter;
use reqwest::Client;
use scraper::{Html, Selector};
use url::Url;

const MAX_CANDIDATES: usize = 5;
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// A JSON body this small is assumed to be an error or stub payload.
const MIN_JSON_BYTES: usize = 500;

const ENDPOINT_MARKERS: &[&str] = &["/api/", "graphql", ".json"];

/// Result of a successful interception.
#[derive(Debug, Clone)]
pub struct InterceptedPayload {
    pub endpoint: String,
    pub body: String,
}

/// Probes a page's data endpoints instead of scraping its markup.
#[derive(Clone)]
pub struct ApiInterceptor {
    client: Client,
    limiter: DomainRateLimiter,
}

impl ApiInterceptor {
    pub fn new(limiter: DomainRateLimiter) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;
        Ok(Self { client, limiter })
    }

    /// Probe the endpoint candidates found in `html`. Returns the first
    /// substantial JSON payload, or `None` when nothing pans out. Probe
    /// failures are logged, never surfaced.
    pub async fn intercept(&self, page_url: &str, html: &str) -> Option<InterceptedPayload> {
        let candidates = discover_endpoints(html, page_url);
        if candidates.is_empty() {
            return None;
        }
        tracing::debug!(
            url = page_url,
            count = candidates.len(),
            "Probing API endpoint candidates"
        );

        for endpoint in candidates {
            match self.probe(&endpoint).await {
                Ok(Some(body)) => {
                    tracing::info!(url = page_url, endpoint = %endpoint, "API interception hit");
                    return Some(InterceptedPayload { endpoint, body });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "Endpoint probe failed");
                }
            }
        }
        None
    }

    async fn probe(&self, endpoint: &str) -> Result<Option<String>, AppError> {
        if let Some(domain) = DomainRateLimiter::domain_key(endpoint) {
            self.limiter.acquire(&domain).await;
        }

        let response = self
            .client
            .get(endpoint)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        if body.len() < MIN_JSON_BYTES {
            return Ok(None);
        }
        if serde_json::from_str::<serde_json::Value>(&body).is_err() {
            return Ok(None);
        }
        Ok(Some(body))
    }
}

/// Scan HTML for data-endpoint candidates: script `src` attributes and
/// quoted strings inside inline scripts that look like API paths. Relative
/// candidates resolve against the page URL. Capped at [`MAX_CANDIDATES`].
pub fn discover_endpoints(html: &str, page_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut seen = Vec::new();

    let Ok(script_selector) = Selector::parse("script") else {
        return seen;
    };
    for script in document.select(&script_selector) {
        if let Some(src) = script.value().attr("src") {
            push_candidate(&mut seen, &base, src);
        } else {
            for literal in quoted_strings(&script.text().collect::<String>()) {
                push_candidate(&mut seen, &base, &literal);
            }
        }
        if seen.len() >= MAX_CANDIDATES {
            break;
        }
    }

    seen
}

fn push_candidate(seen: &mut Vec<String>, base: &Url, raw: &str) {
    if seen.len() >= MAX_CANDIDATES {
        return;
    }
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    if !ENDPOINT_MARKERS.iter().any(|m| lower.contains(m)) {
        return;
    }
    // Only rooted paths and absolute http(s) URLs; skip bundler artifacts
    // like "./chunk.api.json" and protocol-relative noise.
    let resolved = if raw.starts_with('/') && !raw.starts_with("//") {
        base.join(raw).ok()
    } else if lower.starts_with("http://") || lower.starts_with("https://") {
        Url::parse(raw).ok()
    } else {
        None
    };

    if let Some(url) = resolved {
        let url = url.to_string();
        if !seen.contains(&url) {
            seen.push(url);
        }
    }
}

/// Extract single- and double-quoted string literals from script source.
fn quoted_strings(source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '"' && c != '\'' {
            continue;
        }
        let quote = c;
        let mut literal = String::new();
        let mut closed = false;
        for inner in chars.by_ref() {
            if inner == quote {
                closed = true;
                break;
            }
            if inner == '\n' {
                break;
            }
            literal.push(inner);
        }
        if closed && !literal.is_empty() && literal.len() < 2048 {
            out.push(literal);
        }
    }
    out
}
