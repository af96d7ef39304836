//! NVD CVE feed client (REST API 2.0).

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use tracing::debug;

use stackwatch_shared::{Result, SourceKind, StackwatchError};

use crate::{FeedSource, RawAdvisory, build_client, lookback};

const NVD_ENDPOINT: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";

/// Delay between result pages; NVD asks unauthenticated clients to pace.
const PAGE_PAUSE_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct NvdSettings {
    pub max_results: usize,
    pub timeout_seconds: u64,
    pub endpoint: String,
}

impl Default for NvdSettings {
    fn default() -> Self {
        Self {
            max_results: 200,
            timeout_seconds: 20,
            endpoint: NVD_ENDPOINT.into(),
        }
    }
}

pub struct NvdFeed {
    settings: NvdSettings,
    client: Client,
}

impl NvdFeed {
    pub fn new(settings: NvdSettings) -> Result<Self> {
        let client = build_client(settings.timeout_seconds, "nvd")?;
        Ok(Self { settings, client })
    }
}

#[async_trait::async_trait]
impl FeedSource for NvdFeed {
    fn name(&self) -> &str {
        "nvd"
    }

    async fn fetch_recent(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawAdvisory>> {
        let start = lookback(since);
        let end = Utc::now();
        let per_page = self.settings.max_results;

        let mut raw: Vec<RawAdvisory> = Vec::new();
        let mut start_index = 0usize;
        let mut total_results: Option<usize> = None;

        while total_results.is_none_or(|total| start_index < total) {
            let response = self
                .client
                .get(&self.settings.endpoint)
                .query(&[
                    ("pubStartDate", to_iso(start)),
                    ("pubEndDate", to_iso(end)),
                    ("resultsPerPage", per_page.to_string()),
                    ("startIndex", start_index.to_string()),
                ])
                .send()
                .await
                .map_err(|e| StackwatchError::feed("nvd", e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(StackwatchError::feed("nvd", format!("HTTP {status}")));
            }

            let payload: serde_json::Value = response
                .json()
                .await
                .map_err(|e| StackwatchError::feed("nvd", format!("body decode: {e}")))?;

            total_results = Some(
                payload
                    .get("totalResults")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize,
            );

            if let Some(vulnerabilities) = payload.get("vulnerabilities").and_then(|v| v.as_array())
            {
                for entry in vulnerabilities {
                    if let Some(cve) = entry.get("cve") {
                        raw.push(RawAdvisory {
                            source: SourceKind::Nvd,
                            payload: cve.clone(),
                        });
                    }
                }
            }

            start_index += per_page;
            if total_results.is_some_and(|total| start_index < total) {
                tokio::time::sleep(std::time::Duration::from_millis(PAGE_PAUSE_MS)).await;
            }
        }

        debug!(count = raw.len(), "nvd fetch complete");
        Ok(raw)
    }
}

fn to_iso(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_and_unwraps_cve_objects() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "totalResults": 2,
            "vulnerabilities": [
                {"cve": {"id": "CVE-2024-0001", "published": "2024-08-01T00:00:00.000Z"}},
                {"cve": {"id": "CVE-2024-0002", "published": "2024-08-02T00:00:00.000Z"}}
            ]
        });

        Mock::given(method("GET"))
            .and(path("/cves"))
            .and(query_param("startIndex", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let feed = NvdFeed::new(NvdSettings {
            endpoint: format!("{}/cves", server.uri()),
            max_results: 50,
            ..Default::default()
        })
        .unwrap();

        let raw = feed.fetch_recent(None).await.expect("fetch");
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].source, SourceKind::Nvd);
        assert_eq!(raw[0].payload["id"], "CVE-2024-0001");
    }

    #[tokio::test]
    async fn http_error_is_feed_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let feed = NvdFeed::new(NvdSettings {
            endpoint: server.uri(),
            ..Default::default()
        })
        .unwrap();

        let err = feed.fetch_recent(None).await.expect_err("must fail");
        assert!(matches!(err, StackwatchError::Feed { .. }));
    }
}
