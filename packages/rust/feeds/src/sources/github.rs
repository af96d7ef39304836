//! GitHub Security Advisories (GHSA) feed client.

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use tracing::{debug, warn};

use stackwatch_shared::{Result, SourceKind, StackwatchError};

use crate::{FeedSource, RawAdvisory, build_client, lookback};

const GITHUB_ADVISORIES_ENDPOINT: &str = "https://api.github.com/advisories";

#[derive(Debug, Clone)]
pub struct GithubSettings {
    /// Ecosystem filter applied upstream when exactly one is declared.
    pub ecosystems: Vec<String>,
    pub max_results: usize,
    pub timeout_seconds: u64,
    pub endpoint: String,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            ecosystems: Vec::new(),
            max_results: 200,
            timeout_seconds: 20,
            endpoint: GITHUB_ADVISORIES_ENDPOINT.into(),
        }
    }
}

pub struct GithubFeed {
    settings: GithubSettings,
    client: Client,
}

impl GithubFeed {
    pub fn new(settings: GithubSettings) -> Result<Self> {
        let client = build_client(settings.timeout_seconds, "github")?;
        Ok(Self { settings, client })
    }
}

#[async_trait::async_trait]
impl FeedSource for GithubFeed {
    fn name(&self) -> &str {
        "github"
    }

    async fn fetch_recent(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawAdvisory>> {
        let start = lookback(since);
        let per_page = self.settings.max_results.min(100);
        let mut raw: Vec<RawAdvisory> = Vec::new();
        let mut page = 1usize;

        loop {
            let mut request = self
                .client
                .get(&self.settings.endpoint)
                .header("Accept", "application/vnd.github+json")
                .query(&[
                    ("per_page", per_page.to_string()),
                    ("page", page.to_string()),
                    ("since", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ]);
            if let [only] = self.settings.ecosystems.as_slice() {
                request = request.query(&[("ecosystem", only.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StackwatchError::feed("github", e.to_string()))?;

            let status = response.status();
            if status.as_u16() == 403 {
                // Secondary rate limit; return what we have rather than fail
                // the whole feed.
                warn!("github advisories rate limit hit, stopping pagination");
                break;
            }
            if !status.is_success() {
                return Err(StackwatchError::feed("github", format!("HTTP {status}")));
            }

            let payload: Vec<serde_json::Value> = response
                .json()
                .await
                .map_err(|e| StackwatchError::feed("github", format!("body decode: {e}")))?;

            if payload.is_empty() {
                break;
            }

            let page_len = payload.len();
            let all_older = payload.iter().all(|entry| {
                published_at(entry).is_some_and(|published| published < start)
            });

            raw.extend(payload.into_iter().map(|payload| RawAdvisory {
                source: SourceKind::Github,
                payload,
            }));

            if raw.len() >= self.settings.max_results {
                raw.truncate(self.settings.max_results);
                break;
            }
            if all_older || page_len < per_page {
                break;
            }
            page += 1;
        }

        debug!(count = raw.len(), "github fetch complete");
        Ok(raw)
    }
}

fn published_at(entry: &serde_json::Value) -> Option<DateTime<Utc>> {
    entry
        .get("published_at")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn single_ecosystem_is_pushed_upstream() {
        let server = MockServer::start().await;
        let body = serde_json::json!([
            {"ghsa_id": "GHSA-aaaa", "published_at": "2024-08-01T00:00:00Z"}
        ]);

        Mock::given(method("GET"))
            .and(query_param("ecosystem", "npm"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let feed = GithubFeed::new(GithubSettings {
            ecosystems: vec!["npm".into()],
            endpoint: server.uri(),
            max_results: 10,
            ..Default::default()
        })
        .unwrap();

        let raw = feed.fetch_recent(None).await.expect("fetch");
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].payload["ghsa_id"], "GHSA-aaaa");
    }

    #[tokio::test]
    async fn rate_limit_yields_partial_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let feed = GithubFeed::new(GithubSettings {
            endpoint: server.uri(),
            ..Default::default()
        })
        .unwrap();

        let raw = feed.fetch_recent(None).await.expect("partial ok");
        assert!(raw.is_empty());
    }
}
