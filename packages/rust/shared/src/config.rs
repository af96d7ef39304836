//! Application configuration for stackwatch.
//!
//! User config lives at `~/.stackwatch/stackwatch.toml`.
//! CLI flags override config file values, which override defaults.
//! Webhook URLs may be inlined or named via `url_env` so secrets stay in the
//! environment rather than on disk.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, StackwatchError};
use crate::types::{MatchMode, StackDefinition};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "stackwatch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".stackwatch";

// ---------------------------------------------------------------------------
// Config structs (matching stackwatch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Declared technology stack used for relevance matching.
    #[serde(default)]
    pub stack: StackConfig,

    /// Runtime settings.
    #[serde(default)]
    pub settings: SettingsConfig,

    /// Feed source toggles.
    #[serde(default)]
    pub feeds: FeedsConfig,

    /// Notification targets.
    #[serde(default)]
    pub notify: Vec<NotifyTarget>,
}

/// `[stack]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(default)]
    pub cloud: Vec<String>,

    #[serde(default)]
    pub languages: Vec<String>,

    #[serde(default)]
    pub services: Vec<String>,

    #[serde(default)]
    pub keywords: Vec<String>,

    /// Ecosystem → directly declared package names.
    #[serde(default)]
    pub packages: BTreeMap<String, Vec<String>>,

    /// `[stack.match]` sub-section.
    #[serde(default, rename = "match")]
    pub match_settings: MatchConfig,

    /// `[stack.deps]` sub-section — dependency file discovery.
    #[serde(default)]
    pub deps: DepsConfig,
}

/// `[stack.match]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchConfig {
    /// `strict` or `loose`.
    #[serde(default)]
    pub mode: MatchMode,
}

/// `[stack.deps]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Include transitive dependencies discovered from lockfiles.
    #[serde(default = "default_true")]
    pub include_transitive: bool,

    /// Restrict loading to these ecosystems. Empty means all.
    #[serde(default)]
    pub ecosystems: Vec<String>,

    /// Dependency files to read, relative to the config file.
    #[serde(default)]
    pub sources: Vec<DepSource>,
}

impl Default for DepsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            include_transitive: true,
            ecosystems: Vec::new(),
            sources: Vec::new(),
        }
    }
}

/// One `[[stack.deps.sources]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepSource {
    /// `manifest` (direct deps) or `lockfile` (transitive deps).
    pub kind: DepSourceKind,
    pub path: String,
}

/// Kind of dependency file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepSourceKind {
    Manifest,
    Lockfile,
}

/// `[settings]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Minutes between polling cycles in continuous mode.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u64,

    /// Path of the dedup state file.
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// When false, items with CVSS < 4.0 are suppressed.
    #[serde(default)]
    pub include_low_severity: bool,

    /// Per-feed result cap.
    #[serde(default = "default_max_results")]
    pub max_results_per_feed: usize,

    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Upper bound on a whole Fetching phase; slower feeds are treated as
    /// failed for the cycle.
    #[serde(default = "default_fetch_budget")]
    pub fetch_budget_seconds: u64,

    /// Maximum feeds fetched simultaneously.
    #[serde(default = "default_max_concurrent_feeds")]
    pub max_concurrent_feeds: usize,

    /// Per-cycle cap on delivered notifications; the lowest-priority tail is
    /// dropped, never reordered.
    #[serde(default = "default_max_notifications")]
    pub max_notifications_per_run: usize,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            poll_interval_minutes: default_poll_interval(),
            state_file: default_state_file(),
            include_low_severity: false,
            max_results_per_feed: default_max_results(),
            request_timeout_seconds: default_request_timeout(),
            fetch_budget_seconds: default_fetch_budget(),
            max_concurrent_feeds: default_max_concurrent_feeds(),
            max_notifications_per_run: default_max_notifications(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    15
}
fn default_state_file() -> String {
    "~/.stackwatch/state.json".into()
}
fn default_max_results() -> usize {
    200
}
fn default_request_timeout() -> u64 {
    20
}
fn default_fetch_budget() -> u64 {
    120
}
fn default_max_concurrent_feeds() -> usize {
    4
}
fn default_max_notifications() -> usize {
    20
}

/// `[feeds]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedsConfig {
    #[serde(default = "default_true")]
    pub nvd: bool,

    #[serde(default = "default_true")]
    pub github: bool,

    #[serde(default = "default_true")]
    pub msrc: bool,

    #[serde(default = "default_true")]
    pub cisa: bool,

    #[serde(default = "default_true")]
    pub osv: bool,

    #[serde(default)]
    pub hackernews: HackerNewsConfig,

    /// Additional RSS/Atom sources.
    #[serde(default)]
    pub rss: Vec<RssSourceConfig>,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            nvd: true,
            github: true,
            msrc: true,
            cisa: true,
            osv: true,
            hackernews: HackerNewsConfig::default(),
            rss: Vec::new(),
        }
    }
}

/// `[feeds.hackernews]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HackerNewsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cap on stack-derived search terms.
    #[serde(default = "default_hn_max_terms")]
    pub max_terms: usize,
}

impl Default for HackerNewsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_terms: default_hn_max_terms(),
        }
    }
}

fn default_hn_max_terms() -> usize {
    6
}

/// One `[[feeds.rss]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssSourceConfig {
    pub name: String,
    pub url: String,
}

/// One `[[notify]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyTarget {
    /// `slack`, `discord`, or `webhook`.
    pub kind: NotifyKind,

    /// Webhook URL, inlined. Prefer `url_env` for secrets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Name of an env var holding the webhook URL (never store the URL
    /// itself when using this).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_env: Option<String>,

    /// Extra headers sent with each request (generic webhook only).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Notification channel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    Slack,
    Discord,
    Webhook,
}

impl NotifyKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Discord => "discord",
            Self::Webhook => "webhook",
        }
    }
}

impl NotifyTarget {
    /// Resolve the webhook URL from the inline value or the named env var.
    /// Returns `Ok(None)` when the target is unconfigured (skipped with a
    /// warning by the caller) and an error for present-but-invalid URLs.
    pub fn resolve_url(&self) -> Result<Option<String>> {
        let raw = match (&self.url, &self.url_env) {
            (Some(url), _) => url.clone(),
            (None, Some(var)) => match std::env::var(var) {
                Ok(val) if !val.is_empty() => val,
                _ => return Ok(None),
            },
            (None, None) => return Ok(None),
        };

        let parsed = Url::parse(&raw).map_err(|e| {
            StackwatchError::config(format!("invalid {} webhook URL: {e}", self.kind.label()))
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(StackwatchError::config(format!(
                "{} webhook URL must be http(s)",
                self.kind.label()
            )));
        }
        Ok(Some(raw))
    }
}

// ---------------------------------------------------------------------------
// Stack conversion
// ---------------------------------------------------------------------------

impl From<&StackConfig> for StackDefinition {
    fn from(config: &StackConfig) -> Self {
        let lower_set = |values: &[String]| -> BTreeSet<String> {
            values
                .iter()
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect()
        };

        let packages = config
            .packages
            .iter()
            .map(|(eco, names)| {
                let eco = eco.to_lowercase();
                let normalized = names
                    .iter()
                    .map(|name| crate::types::normalize_package_name(name, &eco))
                    .filter(|name| !name.is_empty())
                    .collect();
                (eco, normalized)
            })
            .collect();

        Self {
            cloud: lower_set(&config.cloud),
            languages: lower_set(&config.languages),
            services: lower_set(&config.services),
            keywords: lower_set(&config.keywords),
            packages,
            dependencies: Default::default(),
            match_mode: config.match_settings.mode,
            include_low_severity: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.stackwatch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| StackwatchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.stackwatch/stackwatch.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| StackwatchError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| StackwatchError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| StackwatchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| StackwatchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| StackwatchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` in a configured path against the user's home.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("poll_interval_minutes"));
        assert!(toml_str.contains("state_file"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.settings.poll_interval_minutes, 15);
        assert_eq!(parsed.settings.max_results_per_feed, 200);
        assert!(parsed.feeds.nvd);
    }

    #[test]
    fn config_with_stack_and_notify() {
        let toml_str = r#"
[stack]
cloud = ["AWS"]
services = ["Kubernetes"]
keywords = ["oauth"]

[stack.packages]
npm = ["lodash", "express"]

[stack.match]
mode = "strict"

[[notify]]
kind = "slack"
url = "https://hooks.slack.com/services/T0/B0/x"

[[notify]]
kind = "webhook"
url_env = "STACKWATCH_HOOK_URL"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.notify.len(), 2);
        assert_eq!(config.notify[0].kind, NotifyKind::Slack);
        assert_eq!(config.stack.match_settings.mode, MatchMode::Strict);

        let stack = StackDefinition::from(&config.stack);
        assert!(stack.cloud.contains("aws"));
        assert!(stack.services.contains("kubernetes"));
        assert!(stack.packages["npm"].contains("lodash"));
        assert_eq!(stack.match_mode, MatchMode::Strict);
    }

    #[test]
    fn notify_target_resolves_env_url() {
        // Use a unique env var name to avoid interfering with other tests
        unsafe { std::env::set_var("SW_TEST_HOOK_URL_93412", "https://example.com/hook") };
        let target = NotifyTarget {
            kind: NotifyKind::Webhook,
            url: None,
            url_env: Some("SW_TEST_HOOK_URL_93412".into()),
            headers: BTreeMap::new(),
        };
        assert_eq!(
            target.resolve_url().expect("resolve"),
            Some("https://example.com/hook".to_string())
        );
    }

    #[test]
    fn notify_target_rejects_non_http_url() {
        let target = NotifyTarget {
            kind: NotifyKind::Slack,
            url: Some("file:///etc/passwd".into()),
            url_env: None,
            headers: BTreeMap::new(),
        };
        assert!(target.resolve_url().is_err());
    }

    #[test]
    fn notify_target_unconfigured_is_none() {
        let target = NotifyTarget {
            kind: NotifyKind::Discord,
            url: None,
            url_env: Some("SW_TEST_UNSET_VAR_93412".into()),
            headers: BTreeMap::new(),
        };
        assert_eq!(target.resolve_url().expect("resolve"), None);
    }

    #[test]
    fn expand_home_passthrough_for_absolute() {
        assert_eq!(expand_home("/tmp/state.json"), PathBuf::from("/tmp/state.json"));
    }
}
