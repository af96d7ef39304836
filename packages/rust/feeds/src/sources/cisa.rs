//! CISA Known Exploited Vulnerabilities catalog client.
//!
//! The catalog is a single JSON document; entries are filtered client-side
//! by `dateAdded`.

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use tracing::debug;

use stackwatch_shared::{Result, SourceKind, StackwatchError};

use crate::{FeedSource, RawAdvisory, build_client, lookback};

const CISA_ENDPOINT: &str =
    "https://www.cisa.gov/sites/default/files/feeds/known_exploited_vulnerabilities.json";

#[derive(Debug, Clone)]
pub struct CisaSettings {
    pub timeout_seconds: u64,
    pub endpoint: String,
}

impl Default for CisaSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 20,
            endpoint: CISA_ENDPOINT.into(),
        }
    }
}

pub struct CisaFeed {
    settings: CisaSettings,
    client: Client,
}

impl CisaFeed {
    pub fn new(settings: CisaSettings) -> Result<Self> {
        let client = build_client(settings.timeout_seconds, "cisa")?;
        Ok(Self { settings, client })
    }
}

#[async_trait::async_trait]
impl FeedSource for CisaFeed {
    fn name(&self) -> &str {
        "cisa"
    }

    async fn fetch_recent(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawAdvisory>> {
        let start = lookback(since);

        let response = self
            .client
            .get(&self.settings.endpoint)
            .send()
            .await
            .map_err(|e| StackwatchError::feed("cisa", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StackwatchError::feed("cisa", format!("HTTP {status}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StackwatchError::feed("cisa", format!("body decode: {e}")))?;

        let mut raw: Vec<RawAdvisory> = Vec::new();
        if let Some(vulnerabilities) = payload.get("vulnerabilities").and_then(|v| v.as_array()) {
            for entry in vulnerabilities {
                if date_added(entry).is_some_and(|added| added >= start) {
                    raw.push(RawAdvisory {
                        source: SourceKind::Cisa,
                        payload: entry.clone(),
                    });
                }
            }
        }

        debug!(count = raw.len(), "cisa fetch complete");
        Ok(raw)
    }
}

/// `dateAdded` is a bare `YYYY-MM-DD`; treat it as midnight UTC.
pub(crate) fn date_added(entry: &serde_json::Value) -> Option<DateTime<Utc>> {
    let value = entry.get("dateAdded")?.as_str()?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
