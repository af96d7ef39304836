//! Generic RSS/Atom feed client for user-configured sources.

use chrono::{DateTime, Utc};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use stackwatch_shared::{Result, SourceKind, StackwatchError};

use crate::{FeedSource, RawAdvisory, build_client, lookback};

use super::xml;

/// One configured RSS/Atom source.
#[derive(Debug, Clone)]
pub struct RssSource {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default)]
pub struct RssSettings {
    pub sources: Vec<RssSource>,
    pub timeout_seconds: u64,
}

pub struct RssFeed {
    settings: RssSettings,
    client: Client,
}

impl RssFeed {
    pub fn new(settings: RssSettings) -> Result<Self> {
        let client = build_client(settings.timeout_seconds.max(1), "rss")?;
        Ok(Self { settings, client })
    }

    async fn fetch_source(
        &self,
        source: &RssSource,
        start: DateTime<Utc>,
    ) -> Result<Vec<RawAdvisory>> {
        let response = self
            .client
            .get(&source.url)
            .send()
            .await
            .map_err(|e| StackwatchError::feed(&source.name, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StackwatchError::feed(&source.name, format!("HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| StackwatchError::feed(&source.name, format!("body read: {e}")))?;

        let entries = xml::parse_feed(&body)
            .map_err(|e| StackwatchError::feed(&source.name, format!("feed parse: {e}")))?;

        let mut raw = Vec::new();
        for entry in entries {
            let published = entry.published.as_deref().and_then(parse_feed_date);
            if published.is_some_and(|p| p < start) {
                continue;
            }
            // A stable fallback id when the feed publishes no guid.
            let guid = entry.guid.clone().unwrap_or_else(|| {
                let basis = format!(
                    "{}|{}",
                    entry.link.as_deref().unwrap_or_default(),
                    entry.title.as_deref().unwrap_or_default()
                );
                let mut hasher = Sha256::new();
                hasher.update(basis.as_bytes());
                format!("{:x}", hasher.finalize())
            });
            raw.push(RawAdvisory {
                source: SourceKind::Rss,
                payload: serde_json::json!({
                    "source_name": source.name,
                    "guid": guid,
                    "title": entry.title,
                    "description": entry.description,
                    "link": entry.link,
                    "published": entry.published,
                }),
            });
        }
        Ok(raw)
    }
}

#[async_trait::async_trait]
impl FeedSource for RssFeed {
    fn name(&self) -> &str {
        "rss"
    }

    async fn fetch_recent(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawAdvisory>> {
        let start = lookback(since);
        let mut raw: Vec<RawAdvisory> = Vec::new();

        // One slow or broken source must not take down the others.
        for source in &self.settings.sources {
            match self.fetch_source(source, start).await {
                Ok(entries) => raw.extend(entries),
                Err(e) => warn!(source = %source.name, error = %e, "rss source failed"),
            }
        }

        debug!(count = raw.len(), "rss fetch complete");
        Ok(raw)
    }
}

/// Parse the date formats feeds actually publish: RFC 2822 (`pubDate`) and
/// RFC 3339 (Atom `published`/`updated`).
pub(crate) fn parse_feed_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
