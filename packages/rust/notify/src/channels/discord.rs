//! Discord webhook channel (embed-style rich card).

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;

use stackwatch_shared::{Priority, Result};

use crate::retry::{RetryPolicy, post_with_retry};
use crate::{AlertPayload, Notifier, truncate_summary};

const SUMMARY_LIMIT: usize = 400;

pub struct DiscordNotifier {
    webhook_url: String,
    client: Client,
    policy: RetryPolicy,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String, timeout_seconds: u64, policy: RetryPolicy) -> Result<Self> {
        let client = super::build_client(timeout_seconds, "discord")?;
        Ok(Self {
            webhook_url,
            client,
            policy,
        })
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, payload: &AlertPayload) -> Result<()> {
        let body = build_payload(payload);
        post_with_retry(
            &self.client,
            "discord",
            &self.webhook_url,
            &Default::default(),
            &body,
            &self.policy,
        )
        .await
    }
}

fn build_payload(payload: &AlertPayload) -> serde_json::Value {
    let mut fields = vec![
        serde_json::json!({
            "name": "Priority",
            "value": format!("{} ({})", payload.priority, payload.score),
            "inline": true,
        }),
        serde_json::json!({
            "name": "Source",
            "value": payload.source.label().to_uppercase(),
            "inline": true,
        }),
    ];

    if !payload.affected_packages.is_empty() {
        let packages = payload
            .affected_packages
            .iter()
            .take(10)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        fields.push(serde_json::json!({
            "name": "Affected",
            "value": packages,
            "inline": false,
        }));
    }

    if !payload.reasons.is_empty() {
        fields.push(serde_json::json!({
            "name": "Why you're seeing this",
            "value": payload.reasons.iter().take(5).cloned().collect::<Vec<_>>().join("\n"),
            "inline": false,
        }));
    }

    fields.push(serde_json::json!({
        "name": "Scoring",
        "value": payload.rationale,
        "inline": false,
    }));

    serde_json::json!({
        "embeds": [{
            "title": payload.title,
            "description": truncate_summary(&payload.summary, SUMMARY_LIMIT),
            "url": payload.url,
            "color": priority_color(payload.priority),
            "fields": fields,
            "timestamp": payload.published.to_rfc3339_opts(SecondsFormat::Secs, true),
        }]
    })
}

fn priority_color(priority: Priority) -> u32 {
    match priority {
        Priority::P0 => 0x00E7_4C3C,
        Priority::P1 => 0x00E6_7E22,
        Priority::P2 => 0x00F1_C40F,
        Priority::P3 => 0x0095_A5A6,
    }
}
