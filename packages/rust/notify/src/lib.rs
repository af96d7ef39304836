//! Notification channels and the delivery router.
//!
//! Each channel implements [`Notifier`] over a webhook URL with its own wire
//! shape (Slack attachment, Discord embed, flat JSON); all carry the same
//! semantic fields. The [`NotificationRouter`] fans one alert out to every
//! configured channel concurrently and reports per-channel outcomes —
//! delivery counts as accepted store-wide when at least one channel
//! accepted.

mod channels;
mod retry;
mod router;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use stackwatch_shared::{
    AppConfig, NotifyKind, Priority, Result, ScoredAlert, Severity, SourceKind,
};

pub use channels::{DiscordNotifier, SlackNotifier, WebhookNotifier};
pub use retry::RetryPolicy;
pub use router::{DeliveryOutcome, NotificationRouter, order_alerts};

/// User-Agent string for webhook requests.
pub const USER_AGENT: &str = concat!("stackwatch/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// AlertPayload
// ---------------------------------------------------------------------------

/// The channel-independent alert contents. Exact wire shape is
/// channel-specific but every channel carries all of these fields.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub title: String,
    pub summary: String,
    pub priority: Priority,
    pub score: u8,
    pub source: SourceKind,
    pub url: String,
    pub published: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvss_score: Option<f64>,
    pub affected_packages: Vec<String>,
    pub reasons: Vec<String>,
    pub rationale: String,
}

impl AlertPayload {
    pub fn from_alert(alert: &ScoredAlert) -> Self {
        let item = &alert.item;
        Self {
            title: item.title.clone(),
            summary: if item.description.is_empty() {
                item.title.clone()
            } else {
                item.description.clone()
            },
            priority: alert.priority,
            score: alert.score,
            source: item.source,
            url: item.url.clone(),
            published: item.published,
            severity: item.severity,
            cvss_score: item.cvss_score,
            affected_packages: item.affected_packages.iter().cloned().collect(),
            reasons: alert.reasons.iter().map(|r| r.to_string()).collect(),
            rationale: alert.rationale.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Uniform send contract over all notification channels.
///
/// `Ok(())` means the channel accepted the alert (HTTP success after any
/// retries); an error means the retry budget is exhausted for this channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name for logging (`slack`, `discord`, `webhook`).
    fn name(&self) -> &str;

    async fn send(&self, payload: &AlertPayload) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Construction from config
// ---------------------------------------------------------------------------

/// Instantiate every configured notification target. Targets with no
/// resolvable webhook URL are skipped with a warning; invalid URLs are
/// config errors.
pub fn build_notifiers(config: &AppConfig) -> Result<Vec<std::sync::Arc<dyn Notifier>>> {
    let timeout = config.settings.request_timeout_seconds;
    let policy = RetryPolicy::default();
    let mut notifiers: Vec<std::sync::Arc<dyn Notifier>> = Vec::new();

    for target in &config.notify {
        let Some(url) = target.resolve_url()? else {
            tracing::warn!(
                kind = target.kind.label(),
                "notify target has no webhook URL configured, skipping"
            );
            continue;
        };
        match target.kind {
            NotifyKind::Slack => {
                notifiers.push(std::sync::Arc::new(SlackNotifier::new(
                    url,
                    timeout,
                    policy.clone(),
                )?));
            }
            NotifyKind::Discord => {
                notifiers.push(std::sync::Arc::new(DiscordNotifier::new(
                    url,
                    timeout,
                    policy.clone(),
                )?));
            }
            NotifyKind::Webhook => {
                notifiers.push(std::sync::Arc::new(WebhookNotifier::new(
                    url,
                    target.headers.clone(),
                    timeout,
                    policy.clone(),
                )?));
            }
        }
    }
    Ok(notifiers)
}

/// Truncate on a character boundary, appending an ellipsis when shortened.
pub(crate) fn truncate_summary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackwatch_shared::{AdvisoryItem, NotifyTarget, Reason, ReasonKind};

    pub(crate) fn sample_alert() -> ScoredAlert {
        let item = AdvisoryItem {
            id: "nvd:CVE-2024-0001".into(),
            source: SourceKind::Nvd,
            title: "CVE-2024-0001: widget parser RCE".into(),
            description: "A crafted widget causes remote code execution.".into(),
            url: "https://nvd.nist.gov/vuln/detail/CVE-2024-0001".into(),
            published: Utc::now(),
            severity: Some(Severity::Critical),
            cvss_score: Some(9.8),
            affected_packages: std::collections::BTreeSet::from(["npm:widget".to_string()]),
            exploited: true,
        };
        ScoredAlert {
            reasons: vec![Reason::new(ReasonKind::DirectDep, "widget")],
            score: 92,
            priority: Priority::P0,
            rationale: "direct dependency match: widget".into(),
            item,
        }
    }

    #[test]
    fn payload_carries_all_contract_fields() {
        let payload = AlertPayload::from_alert(&sample_alert());
        assert_eq!(payload.priority, Priority::P0);
        assert_eq!(payload.score, 92);
        assert_eq!(payload.source, SourceKind::Nvd);
        assert_eq!(payload.affected_packages, vec!["npm:widget".to_string()]);
        assert_eq!(payload.reasons.len(), 1);
        assert!(payload.rationale.contains("widget"));
    }

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_summary("short", 10), "short");
        let long = "ü".repeat(50);
        let cut = truncate_summary(&long, 20);
        assert!(cut.chars().count() <= 20);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn unconfigured_targets_are_skipped() {
        let mut config = AppConfig::default();
        config.notify.push(NotifyTarget {
            kind: NotifyKind::Slack,
            url: None,
            url_env: Some("SW_NOTIFY_TEST_UNSET_7781".into()),
            headers: Default::default(),
        });

        let notifiers = build_notifiers(&config).expect("build");
        assert!(notifiers.is_empty());
    }

    #[test]
    fn configured_targets_are_built() {
        let mut config = AppConfig::default();
        config.notify.push(NotifyTarget {
            kind: NotifyKind::Webhook,
            url: Some("https://example.com/hook".into()),
            url_env: None,
            headers: Default::default(),
        });

        let notifiers = build_notifiers(&config).expect("build");
        assert_eq!(notifiers.len(), 1);
        assert_eq!(notifiers[0].name(), "webhook");
    }
}
