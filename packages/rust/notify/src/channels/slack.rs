//! Slack incoming-webhook channel (attachment-style card).

use async_trait::async_trait;
use reqwest::Client;

use stackwatch_shared::{Result, Severity};

use crate::retry::{RetryPolicy, post_with_retry};
use crate::{AlertPayload, Notifier, truncate_summary};

const SUMMARY_LIMIT: usize = 300;

pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
    policy: RetryPolicy,
}

impl SlackNotifier {
    pub fn new(webhook_url: String, timeout_seconds: u64, policy: RetryPolicy) -> Result<Self> {
        let client = super::build_client(timeout_seconds, "slack")?;
        Ok(Self {
            webhook_url,
            client,
            policy,
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, payload: &AlertPayload) -> Result<()> {
        let body = build_payload(payload);
        post_with_retry(
            &self.client,
            "slack",
            &self.webhook_url,
            &Default::default(),
            &body,
            &self.policy,
        )
        .await
    }
}

fn build_payload(payload: &AlertPayload) -> serde_json::Value {
    let reasons = if payload.reasons.is_empty() {
        payload.rationale.clone()
    } else {
        payload
            .reasons
            .iter()
            .take(5)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    };

    serde_json::json!({
        "attachments": [{
            "color": severity_color(payload.severity),
            "title": payload.title,
            "title_link": payload.url,
            "text": truncate_summary(&payload.summary, SUMMARY_LIMIT),
            "fields": [
                {"title": "Severity", "value": format_severity(payload), "short": true},
                {"title": "Priority", "value": format!("{} ({})", payload.priority, payload.score), "short": true},
                {"title": "Source", "value": payload.source.label().to_uppercase(), "short": true},
                {"title": "Affected", "value": format_affected(payload), "short": true},
                {"title": "Why you're seeing this", "value": reasons, "short": false},
            ],
            "footer": "stackwatch",
            "ts": payload.published.timestamp(),
        }]
    })
}

fn severity_color(severity: Option<Severity>) -> &'static str {
    match severity {
        Some(Severity::Critical) => "#E74C3C",
        Some(Severity::High) => "#E67E22",
        Some(Severity::Medium) => "#F1C40F",
        Some(Severity::Low) | None => "#95A5A6",
    }
}

fn format_severity(payload: &AlertPayload) -> String {
    match (payload.severity, payload.cvss_score) {
        (Some(severity), Some(score)) => format!("{} ({score:.1})", severity.label()),
        (Some(severity), None) => severity.label().to_string(),
        (None, Some(score)) => format!("{score:.1}"),
        (None, None) => "Unknown".to_string(),
    }
}

fn format_affected(payload: &AlertPayload) -> String {
    if payload.affected_packages.is_empty() {
        return "—".to_string();
    }
    payload
        .affected_packages
        .iter()
        .take(10)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ")
}
