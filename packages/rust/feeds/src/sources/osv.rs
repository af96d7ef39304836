//! OSV.dev feed client — one query per declared package.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::debug;

use stackwatch_shared::{Result, SourceKind, StackwatchError};

use crate::{FeedSource, RawAdvisory, build_client, lookback};

const OSV_ENDPOINT: &str = "https://api.osv.dev/v1/query";

/// Internal ecosystem labels → OSV ecosystem names.
const ECOSYSTEM_MAP: &[(&str, &str)] = &[
    ("npm", "npm"),
    ("pip", "PyPI"),
    ("pypi", "PyPI"),
    ("go", "Go"),
    ("gomod", "Go"),
    ("maven", "Maven"),
    ("nuget", "NuGet"),
    ("rubygems", "RubyGems"),
    ("ruby", "RubyGems"),
    ("crates", "crates.io"),
    ("crates.io", "crates.io"),
];

#[derive(Debug, Clone)]
pub struct OsvSettings {
    /// Ecosystem → package names to query.
    pub packages: BTreeMap<String, BTreeSet<String>>,
    pub max_results: usize,
    pub timeout_seconds: u64,
    pub endpoint: String,
}

impl Default for OsvSettings {
    fn default() -> Self {
        Self {
            packages: BTreeMap::new(),
            max_results: 200,
            timeout_seconds: 20,
            endpoint: OSV_ENDPOINT.into(),
        }
    }
}

pub struct OsvFeed {
    settings: OsvSettings,
    client: Client,
}

impl OsvFeed {
    pub fn new(settings: OsvSettings) -> Result<Self> {
        let client = build_client(settings.timeout_seconds, "osv")?;
        Ok(Self { settings, client })
    }
}

#[async_trait::async_trait]
impl FeedSource for OsvFeed {
    fn name(&self) -> &str {
        "osv"
    }

    async fn fetch_recent(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawAdvisory>> {
        let start = lookback(since);
        let mut raw: Vec<RawAdvisory> = Vec::new();

        for (ecosystem, packages) in &self.settings.packages {
            let osv_ecosystem = map_ecosystem(ecosystem);
            for package in packages {
                let query = serde_json::json!({
                    "package": {"name": package, "ecosystem": osv_ecosystem}
                });

                let response = self
                    .client
                    .post(&self.settings.endpoint)
                    .json(&query)
                    .send()
                    .await
                    .map_err(|e| StackwatchError::feed("osv", e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    return Err(StackwatchError::feed("osv", format!("HTTP {status}")));
                }

                let payload: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| StackwatchError::feed("osv", format!("body decode: {e}")))?;

                let Some(vulns) = payload.get("vulns").and_then(|v| v.as_array()) else {
                    continue;
                };
                for vuln in vulns {
                    if raw.len() >= self.settings.max_results {
                        debug!(count = raw.len(), "osv result cap reached");
                        return Ok(raw);
                    }
                    if published_before(vuln, start) {
                        continue;
                    }
                    raw.push(RawAdvisory {
                        source: SourceKind::Osv,
                        payload: vuln.clone(),
                    });
                }
            }
        }

        debug!(count = raw.len(), "osv fetch complete");
        Ok(raw)
    }
}

fn map_ecosystem(internal: &str) -> &str {
    let lowered = internal.to_lowercase();
    ECOSYSTEM_MAP
        .iter()
        .find(|(from, _)| *from == lowered)
        .map(|(_, to)| *to)
        .unwrap_or(internal)
}

fn published_before(vuln: &serde_json::Value, cutoff: DateTime<Utc>) -> bool {
    vuln.get("published")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .is_some_and(|published| published.with_timezone(&Utc) < cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn queries_each_package_with_mapped_ecosystem() {
        let server = MockServer::start().await;
        let now = Utc::now().to_rfc3339();
        let body = serde_json::json!({
            "vulns": [{"id": "GHSA-osv-1", "published": now, "summary": "bad"}]
        });

        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "package": {"name": "requests", "ecosystem": "PyPI"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let feed = OsvFeed::new(OsvSettings {
            packages: BTreeMap::from([(
                "pip".to_string(),
                BTreeSet::from(["requests".to_string()]),
            )]),
            endpoint: server.uri(),
            ..Default::default()
        })
        .unwrap();

        let raw = feed.fetch_recent(None).await.expect("fetch");
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].payload["id"], "GHSA-osv-1");
    }

    #[tokio::test]
    async fn old_vulns_are_filtered_by_cutoff() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "vulns": [{"id": "OLD-1", "published": "2019-01-01T00:00:00Z"}]
        });

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let feed = OsvFeed::new(OsvSettings {
            packages: BTreeMap::from([(
                "npm".to_string(),
                BTreeSet::from(["lodash".to_string()]),
            )]),
            endpoint: server.uri(),
            ..Default::default()
        })
        .unwrap();

        let raw = feed.fetch_recent(None).await.expect("fetch");
        assert!(raw.is_empty());
    }
}
