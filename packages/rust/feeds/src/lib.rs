//! Advisory feed clients and payload normalization.
//!
//! Every source implements [`FeedSource`]: fetch raw, source-specific
//! payloads published since a cutoff (default lookback 24 hours). Raw
//! payloads are passed untouched to [`normalize::normalize`], which maps
//! them into the canonical [`AdvisoryItem`] shape. Adding a source means
//! adding a new implementation, not touching the orchestrator.

pub mod normalize;
pub mod sources;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use tracing::debug;

use stackwatch_shared::{
    AppConfig, Result, SourceKind, StackDefinition, StackwatchError,
};

pub use sources::{
    CisaFeed, CisaSettings, GithubFeed, GithubSettings, HackerNewsFeed, HackerNewsSettings,
    MsrcFeed, MsrcSettings, NvdFeed, NvdSettings, OsvFeed, OsvSettings, RssFeed, RssSettings,
    RssSource,
};

/// User-Agent string for feed requests.
pub const USER_AGENT: &str = concat!("stackwatch/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// A raw feed entry awaiting normalization.
#[derive(Debug, Clone)]
pub struct RawAdvisory {
    pub source: SourceKind,
    pub payload: serde_json::Value,
}

/// Uniform fetch contract over all advisory sources.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Short name for logging (`nvd`, `github`, ...).
    fn name(&self) -> &str;

    /// Fetch entries published since `since`. `None` means the default
    /// 24-hour lookback window. Failures surface as
    /// [`StackwatchError::Feed`] and never abort a polling cycle.
    async fn fetch_recent(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawAdvisory>>;
}

/// Resolve the effective cutoff for a fetch.
pub(crate) fn lookback(since: Option<DateTime<Utc>>) -> DateTime<Utc> {
    since.unwrap_or_else(|| Utc::now() - Duration::hours(24))
}

/// Build the shared HTTP client used by feed requests.
pub(crate) fn build_client(timeout_seconds: u64, source: &str) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(std::time::Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| StackwatchError::feed(source, format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// Construction from config
// ---------------------------------------------------------------------------

/// Instantiate every enabled feed from the loaded configuration.
pub fn build_feeds(config: &AppConfig, stack: &StackDefinition) -> Result<Vec<Box<dyn FeedSource>>> {
    let settings = &config.settings;
    let timeout = settings.request_timeout_seconds;
    let max_results = settings.max_results_per_feed;
    let mut feeds: Vec<Box<dyn FeedSource>> = Vec::new();

    if config.feeds.nvd {
        feeds.push(Box::new(NvdFeed::new(NvdSettings {
            max_results,
            timeout_seconds: timeout,
            ..Default::default()
        })?));
    }

    if config.feeds.github {
        feeds.push(Box::new(GithubFeed::new(GithubSettings {
            ecosystems: stack.packages.keys().cloned().collect(),
            max_results,
            timeout_seconds: timeout,
            ..Default::default()
        })?));
    }

    if config.feeds.osv {
        feeds.push(Box::new(OsvFeed::new(OsvSettings {
            packages: stack.packages.clone(),
            max_results,
            timeout_seconds: timeout,
            ..Default::default()
        })?));
    }

    if config.feeds.cisa {
        feeds.push(Box::new(CisaFeed::new(CisaSettings {
            timeout_seconds: timeout,
            ..Default::default()
        })?));
    }

    if config.feeds.msrc {
        feeds.push(Box::new(MsrcFeed::new(MsrcSettings {
            timeout_seconds: timeout,
            ..Default::default()
        })?));
    }

    if !config.feeds.rss.is_empty() {
        let rss_sources = config
            .feeds
            .rss
            .iter()
            .map(|entry| RssSource {
                name: entry.name.clone(),
                url: entry.url.clone(),
            })
            .collect();
        feeds.push(Box::new(RssFeed::new(RssSettings {
            sources: rss_sources,
            timeout_seconds: timeout,
        })?));
    }

    if config.feeds.hackernews.enabled {
        let terms = derive_search_terms(stack, config.feeds.hackernews.max_terms);
        if terms.is_empty() {
            debug!("hackernews enabled but the stack yields no search terms, skipping");
        } else {
            feeds.push(Box::new(HackerNewsFeed::new(HackerNewsSettings {
                terms,
                max_results,
                timeout_seconds: timeout,
                ..Default::default()
            })?));
        }
    }

    Ok(feeds)
}

/// Derive search terms for text-search feeds from the declared stack:
/// keywords, services, cloud, packages, then languages, deduplicated,
/// minimum 3 characters, capped at `max_terms`.
pub fn derive_search_terms(stack: &StackDefinition, max_terms: usize) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    let candidates = stack
        .keywords
        .iter()
        .chain(stack.services.iter())
        .chain(stack.cloud.iter())
        .chain(stack.packages.values().flatten())
        .chain(stack.languages.iter());

    for candidate in candidates {
        let cleaned = candidate.trim().to_lowercase();
        if cleaned.len() < 3 || terms.contains(&cleaned) {
            continue;
        }
        terms.push(cleaned);
        if terms.len() >= max_terms {
            break;
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn stack() -> StackDefinition {
        StackDefinition {
            cloud: BTreeSet::from(["aws".to_string()]),
            languages: BTreeSet::from(["go".to_string(), "python".to_string()]),
            services: BTreeSet::from(["kubernetes".to_string()]),
            keywords: BTreeSet::from(["oauth".to_string()]),
            packages: BTreeMap::from([(
                "npm".to_string(),
                BTreeSet::from(["lodash".to_string()]),
            )]),
            ..Default::default()
        }
    }

    #[test]
    fn derive_terms_skips_short_tokens_and_caps() {
        let terms = derive_search_terms(&stack(), 3);
        assert_eq!(terms.len(), 3);
        // "go" is too short to be a useful search term.
        assert!(!terms.contains(&"go".to_string()));
        assert!(terms.contains(&"oauth".to_string()));
    }

    #[test]
    fn build_feeds_honors_toggles() {
        let mut config = AppConfig::default();
        config.feeds.nvd = false;
        config.feeds.github = false;
        config.feeds.msrc = false;
        config.feeds.osv = false;
        config.feeds.hackernews.enabled = false;

        let feeds = build_feeds(&config, &stack()).expect("build");
        // Only CISA remains enabled.
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].name(), "cisa");
    }

    #[test]
    fn lookback_defaults_to_24_hours() {
        let cutoff = lookback(None);
        let age = Utc::now() - cutoff;
        assert!(age >= Duration::hours(23));
        assert!(age <= Duration::hours(25));

        let explicit = Utc::now() - Duration::days(3);
        assert_eq!(lookback(Some(explicit)), explicit);
    }
}
