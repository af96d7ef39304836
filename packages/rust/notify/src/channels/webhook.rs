//! Generic webhook channel — the full alert payload as flat JSON.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;

use stackwatch_shared::Result;

use crate::retry::{RetryPolicy, post_with_retry};
use crate::{AlertPayload, Notifier};

pub struct WebhookNotifier {
    url: String,
    headers: BTreeMap<String, String>,
    client: Client,
    policy: RetryPolicy,
}

impl WebhookNotifier {
    pub fn new(
        url: String,
        headers: BTreeMap<String, String>,
        timeout_seconds: u64,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let client = super::build_client(timeout_seconds, "webhook")?;
        Ok(Self {
            url,
            headers,
            client,
            policy,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, payload: &AlertPayload) -> Result<()> {
        // The contract payload serializes directly; no channel styling.
        let body = serde_json::to_value(payload)
            .map_err(|e| stackwatch_shared::StackwatchError::notify("webhook", e.to_string()))?;
        post_with_retry(
            &self.client,
            "webhook",
            &self.url,
            &self.headers,
            &body,
            &self.policy,
        )
        .await
    }
}
