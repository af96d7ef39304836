//! Hacker News (Algolia search API) client, queried per stack-derived term.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::debug;

use stackwatch_shared::{Result, SourceKind, StackwatchError};

use crate::{FeedSource, RawAdvisory, build_client, lookback};

const HN_ENDPOINT: &str = "https://hn.algolia.com/api/v1/search_by_date";

#[derive(Debug, Clone)]
pub struct HackerNewsSettings {
    pub terms: Vec<String>,
    pub max_results: usize,
    pub timeout_seconds: u64,
    pub endpoint: String,
}

impl Default for HackerNewsSettings {
    fn default() -> Self {
        Self {
            terms: Vec::new(),
            max_results: 200,
            timeout_seconds: 20,
            endpoint: HN_ENDPOINT.into(),
        }
    }
}

pub struct HackerNewsFeed {
    settings: HackerNewsSettings,
    client: Client,
}

impl HackerNewsFeed {
    pub fn new(settings: HackerNewsSettings) -> Result<Self> {
        let client = build_client(settings.timeout_seconds, "hackernews")?;
        Ok(Self { settings, client })
    }
}

#[async_trait::async_trait]
impl FeedSource for HackerNewsFeed {
    fn name(&self) -> &str {
        "hackernews"
    }

    async fn fetch_recent(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawAdvisory>> {
        if self.settings.terms.is_empty() {
            return Ok(Vec::new());
        }
        let since_epoch = lookback(since).timestamp();
        let per_query = self.settings.max_results.min(20);

        let mut raw: Vec<RawAdvisory> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();

        for term in &self.settings.terms {
            let response = self
                .client
                .get(&self.settings.endpoint)
                .query(&[
                    ("query", term.as_str()),
                    ("tags", "story"),
                    ("numericFilters", &format!("created_at_i>{since_epoch}")),
                    ("hitsPerPage", &per_query.to_string()),
                ])
                .send()
                .await
                .map_err(|e| StackwatchError::feed("hackernews", e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(StackwatchError::feed("hackernews", format!("HTTP {status}")));
            }

            let payload: serde_json::Value = response
                .json()
                .await
                .map_err(|e| StackwatchError::feed("hackernews", format!("body decode: {e}")))?;

            let Some(hits) = payload.get("hits").and_then(|v| v.as_array()) else {
                continue;
            };
            for hit in hits {
                let Some(object_id) = hit.get("objectID").and_then(|v| v.as_str()) else {
                    continue;
                };
                // The same story surfaces under multiple terms.
                if !seen.insert(object_id.to_string()) {
                    continue;
                }
                raw.push(RawAdvisory {
                    source: SourceKind::HackerNews,
                    payload: hit.clone(),
                });
                if raw.len() >= self.settings.max_results {
                    return Ok(raw);
                }
            }
        }

        debug!(count = raw.len(), "hackernews fetch complete");
        Ok(raw)
    }
}
