//! stackwatch CLI — security-advisory notifier for your declared stack.
//!
//! Polls advisory feeds, matches items against the configured technology
//! stack, scores them, and delivers alerts to Slack/Discord/webhooks
//! exactly once.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
