//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use stackwatch_core::{
    CycleSummary, Orchestrator, OrchestratorSettings, ProgressReporter, build_test_alert,
};
use stackwatch_notify::NotificationRouter;
use stackwatch_shared::{
    AppConfig, ScoredAlert, StackDefinition, expand_home, init_config, load_config,
    load_config_from,
};
use stackwatch_state::DedupStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// stackwatch — security advisories filtered to your stack.
#[derive(Parser)]
#[command(
    name = "stackwatch",
    version,
    about = "Watch security-advisory feeds and get notified about what affects your stack.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Path to the config file (defaults to ~/.stackwatch/stackwatch.toml).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Poll feeds and deliver notifications.
    Run {
        /// Run a single cycle and exit instead of polling continuously.
        #[arg(long)]
        once: bool,

        /// Match and score but deliver nothing and mark nothing sent.
        #[arg(long)]
        dry_run: bool,
    },

    /// Send a synthetic alert to every configured channel and exit.
    TestNotify,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "stackwatch=info",
        1 => "stackwatch=debug",
        _ => "stackwatch=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run { once, dry_run } => cmd_run(cli.config.as_deref(), once, dry_run).await,
        Command::TestNotify => cmd_test_notify(cli.config.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()).await,
        },
    }
}

fn load(config_path: Option<&std::path::Path>) -> Result<AppConfig> {
    let config = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&std::path::Path>, once: bool, dry_run: bool) -> Result<()> {
    let config = load(config_path)?;

    // Stack definition: declared config plus the discovered dependency
    // graph, resolved relative to the config file.
    let mut stack = StackDefinition::from(&config.stack);
    stack.include_low_severity = config.settings.include_low_severity;
    let deps_base = config_path
        .and_then(|p| p.parent())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    stack.dependencies = stackwatch_matcher::deps::load_dependency_graph(&config.stack.deps, &deps_base);

    let feeds: Vec<Arc<dyn stackwatch_feeds::FeedSource>> =
        stackwatch_feeds::build_feeds(&config, &stack)?
            .into_iter()
            .map(Arc::from)
            .collect();
    let router = NotificationRouter::new(stackwatch_notify::build_notifiers(&config)?);
    let store = DedupStore::new(expand_home(&config.settings.state_file));

    let settings = OrchestratorSettings {
        dry_run,
        max_notifications_per_run: config.settings.max_notifications_per_run,
        fetch_budget: Duration::from_secs(config.settings.fetch_budget_seconds),
        max_concurrent_feeds: config.settings.max_concurrent_feeds,
    };

    info!(
        feeds = feeds.len(),
        channels = router.channel_count(),
        once,
        dry_run,
        "starting stackwatch"
    );

    let mut orchestrator = Orchestrator::new(feeds, router, stack, store, settings)?;
    let reporter = CliProgress::new();

    if once {
        let summary = orchestrator.run_cycle(&reporter).await?;
        print_summary(&summary);
    } else {
        let interval = Duration::from_secs(config.settings.poll_interval_minutes * 60);
        orchestrator.run_loop(interval, &reporter).await?;
    }

    Ok(())
}

fn print_summary(summary: &CycleSummary) {
    println!();
    println!("  Cycle complete");
    println!("  Fetched:    {}", summary.fetched);
    println!("  Matched:    {}", summary.matched);
    println!("  Suppressed: {}", summary.suppressed);
    println!("  Duplicates: {}", summary.duplicates);
    println!("  Notified:   {}", summary.notified);
    println!("  Failed:     {}", summary.delivery_failed);
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn dry_run_match(&self, alert: &ScoredAlert) {
        self.spinner.suspend(|| {
            println!(
                "  [{} {:>3}] {}  ({})",
                alert.priority, alert.score, alert.item.title, alert.rationale
            );
        });
    }

    fn done(&self, _summary: &CycleSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// test-notify
// ---------------------------------------------------------------------------

async fn cmd_test_notify(config_path: Option<&std::path::Path>) -> Result<()> {
    let config = load(config_path)?;
    let notifiers = stackwatch_notify::build_notifiers(&config)?;
    if notifiers.is_empty() {
        return Err(eyre!(
            "at least one notify target is required for test-notify — add a [[notify]] entry to the config"
        ));
    }

    let router = NotificationRouter::new(notifiers);
    let alert = build_test_alert();
    let outcome = router.deliver(&alert).await;

    for channel in &outcome.accepted {
        println!("  {channel}: delivered");
    }
    for channel in &outcome.failed {
        println!("  {channel}: FAILED");
    }

    if outcome.accepted_any() {
        Ok(())
    } else {
        Err(eyre!("no channel accepted the test notification"))
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&std::path::Path>) -> Result<()> {
    let config: AppConfig = load(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
