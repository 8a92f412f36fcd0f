use std::time::Duration;

use firmscout_core::cache::TtlCache;
use firmscout_core::error::AppError;
use reqwest::Client;
use robotstxt::DefaultMatcher;
use url::Url;

const ROBOTS_TTL: Duration = Duration::from_secs(3600);
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Politeness gate over robots.txt.
///
/// Robots bodies are cached per origin for an hour. A missing or
/// unfetchable robots.txt allows everything, matching common crawler
/// behavior.
#[derive(Clone)]
pub struct RobotsGuard {
    client: Client,
    user_agent: String,
    bodies: TtlCache<String>,
}

impl RobotsGuard {
    pub fn new(user_agent: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            user_agent: user_agent.into(),
            bodies: TtlCache::new(),
        })
    }

    /// True if robots.txt permits fetching this URL.
    pub async fn allowed(&self, url: &str) -> bool {
        let Some(origin) = origin_of(url) else {
            // Unparseable URLs fail later at fetch time with a real error.
            return true;
        };

        let body = match self.bodies.get(&origin).await {
            Some(body) => body,
            None => {
                let body = self.fetch_robots(&origin).await;
                self.bodies.insert(origin.clone(), body.clone(), ROBOTS_TTL).await;
                body
            }
        };

        if body.is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&body, &self.user_agent, url)
    }

    /// Seed a robots body for an origin without any network fetch.
    #[cfg(test)]
    pub(crate) async fn preload(&self, origin: &str, body: &str) {
        self.bodies
            .insert(origin.to_string(), body.to_string(), ROBOTS_TTL)
            .await;
    }

    async fn fetch_robots(&self, origin: &str) -> String {
        let robots_url = format!("{origin}/robots.txt");
        match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => {
                response.text().await.unwrap_or_default()
            }
            Ok(response) => {
                tracing::debug!(url = %robots_url, status = %response.status(), "No robots.txt");
                String::new()
            }
            Err(e) => {
                tracing::debug!(url = %robots_url, error = %e, "robots.txt fetch failed");
                String::new()
            }
        }
    }
}

fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let port = parsed
        .port()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    Some(format!("{}://{}{}", parsed.scheme(), host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_strips_path_and_keeps_explicit_port() {
        assert_eq!(
            origin_of("https://fund.com/team?x=1"),
            Some("https://fund.com".to_string())
        );
        assert_eq!(
            origin_of("http://fund.com:8080/a/b"),
            Some("http://fund.com:8080".to_string())
        );
        assert_eq!(origin_of("not a url"), None);
    }

    #[test]
    fn matcher_honors_disallow_rules() {
        let body = "User-agent: *\nDisallow: /private/\n";
        let mut matcher = DefaultMatcher::default();
        assert!(matcher.one_agent_allowed_by_robots(body, "firmscout", "https://x.com/team"));
        assert!(!matcher.one_agent_allowed_by_robots(body, "firmscout", "https://x.com/private/a"));
    }

    #[tokio::test]
    async fn unparseable_url_is_allowed_through() {
        let guard = RobotsGuard::new("firmscout").unwrap();
        assert!(guard.allowed("definitely not a url").await);
    }
}
