//! Built-in notification channels.

mod discord;
mod slack;
mod webhook;

pub use discord::DiscordNotifier;
pub use slack::SlackNotifier;
pub use webhook::WebhookNotifier;

use reqwest::Client;

use stackwatch_shared::{Result, StackwatchError};

/// Build the HTTP client shared by a channel's requests.
pub(crate) fn build_client(timeout_seconds: u64, channel: &str) -> Result<Client> {
    Client::builder()
        .user_agent(crate::USER_AGENT)
        .timeout(std::time::Duration::from_secs(timeout_seconds.max(1)))
        .build()
        .map_err(|e| StackwatchError::notify(channel, format!("failed to build HTTP client: {e}")))
}
