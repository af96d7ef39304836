//! Microsoft Security Response Center update-guide RSS client.

use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::debug;

use stackwatch_shared::{Result, SourceKind, StackwatchError};

use crate::{FeedSource, RawAdvisory, build_client, lookback};

use super::xml;

const MSRC_RSS_ENDPOINT: &str = "https://api.msrc.microsoft.com/update-guide/rss";

#[derive(Debug, Clone)]
pub struct MsrcSettings {
    pub timeout_seconds: u64,
    pub endpoint: String,
}

impl Default for MsrcSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 20,
            endpoint: MSRC_RSS_ENDPOINT.into(),
        }
    }
}

pub struct MsrcFeed {
    settings: MsrcSettings,
    client: Client,
}

impl MsrcFeed {
    pub fn new(settings: MsrcSettings) -> Result<Self> {
        let client = build_client(settings.timeout_seconds, "msrc")?;
        Ok(Self { settings, client })
    }
}

#[async_trait::async_trait]
impl FeedSource for MsrcFeed {
    fn name(&self) -> &str {
        "msrc"
    }

    async fn fetch_recent(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawAdvisory>> {
        let start = lookback(since);

        let response = self
            .client
            .get(&self.settings.endpoint)
            .send()
            .await
            .map_err(|e| StackwatchError::feed("msrc", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StackwatchError::feed("msrc", format!("HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| StackwatchError::feed("msrc", format!("body read: {e}")))?;

        let entries = xml::parse_feed(&body)
            .map_err(|e| StackwatchError::feed("msrc", format!("feed parse: {e}")))?;

        let mut raw: Vec<RawAdvisory> = Vec::new();
        for entry in entries {
            let published = entry
                .published
                .as_deref()
                .and_then(super::rss::parse_feed_date);
            if published.is_some_and(|p| p < start) {
                continue;
            }
            raw.push(RawAdvisory {
                source: SourceKind::Msrc,
                payload: serde_json::json!({
                    "guid": entry.guid,
                    "title": entry.title,
                    "description": entry.description,
                    "link": entry.link,
                    "published": entry.published,
                }),
            });
        }

        debug!(count = raw.len(), "msrc fetch complete");
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn parses_update_guide_rss() {
        let server = MockServer::start().await;
        let now = Utc::now().to_rfc2822();
        let body = format!(
            r#"<rss version="2.0"><channel>
              <item>
                <guid>CVE-2024-38000</guid>
                <title>Windows Kernel Elevation of Privilege</title>
                <description>An attacker could gain SYSTEM privileges.</description>
                <link>https://msrc.microsoft.com/update-guide/vulnerability/CVE-2024-38000</link>
                <pubDate>{now}</pubDate>
              </item>
            </channel></rss>"#
        );

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let feed = MsrcFeed::new(MsrcSettings {
            endpoint: server.uri(),
            ..Default::default()
        })
        .unwrap();

        let raw = feed.fetch_recent(None).await.expect("fetch");
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].payload["guid"], "CVE-2024-38000");
        assert_eq!(raw[0].source, SourceKind::Msrc);
    }
}
