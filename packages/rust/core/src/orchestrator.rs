//! One polling cycle, driven as a fixed stage sequence:
//! Fetching → Normalizing → Matching → Scoring → Filtering → Notifying →
//! Recording → Pruning → Idle.
//!
//! The orchestrator owns the in-memory [`DedupRecord`] for a cycle's
//! duration and is its only writer; feeds and channels never touch it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use stackwatch_feeds::{FeedSource, RawAdvisory, normalize};
use stackwatch_matcher::score::score;
use stackwatch_notify::{NotificationRouter, order_alerts};
use stackwatch_shared::{Result, ScoredAlert, StackDefinition, StackwatchError};
use stackwatch_state::{DedupRecord, DedupStore, RETENTION_DAYS};

// ---------------------------------------------------------------------------
// Settings & reporting
// ---------------------------------------------------------------------------

/// Runtime knobs for a cycle, resolved from config + CLI flags.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Run matching/scoring and report, but deliver nothing and mark
    /// nothing sent.
    pub dry_run: bool,
    /// Upper bound on delivered notifications per cycle.
    pub max_notifications_per_run: usize,
    /// Bound on the whole Fetching stage; feeds still in flight when it
    /// expires are treated as failed for the cycle.
    pub fetch_budget: Duration,
    /// Cap on simultaneously fetching feeds.
    pub max_concurrent_feeds: usize,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub fetched: usize,
    pub malformed: usize,
    pub duplicates: usize,
    pub matched: usize,
    pub suppressed: usize,
    pub notified: usize,
    pub delivery_failed: usize,
    pub elapsed: Duration,
}

/// Progress callback for reporting cycle status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn stage(&self, name: &str);
    /// Called per alert in dry-run mode instead of delivery.
    fn dry_run_match(&self, alert: &ScoredAlert);
    /// Called when the cycle completes.
    fn done(&self, summary: &CycleSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _name: &str) {}
    fn dry_run_match(&self, _alert: &ScoredAlert) {}
    fn done(&self, _summary: &CycleSummary) {}
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    feeds: Vec<Arc<dyn FeedSource>>,
    router: NotificationRouter,
    stack: StackDefinition,
    store: DedupStore,
    record: DedupRecord,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Load dedup state and assemble a ready-to-poll orchestrator. A corrupt
    /// state file fails here, before any feed is contacted.
    pub fn new(
        feeds: Vec<Arc<dyn FeedSource>>,
        router: NotificationRouter,
        stack: StackDefinition,
        store: DedupStore,
        settings: OrchestratorSettings,
    ) -> Result<Self> {
        let record = store.load()?;
        if !settings.dry_run && router.is_empty() {
            return Err(StackwatchError::config(
                "at least one notify target is required unless --dry-run is set",
            ));
        }
        Ok(Self {
            feeds,
            router,
            stack,
            store,
            record,
            settings,
        })
    }

    /// Run one full polling cycle.
    #[instrument(skip_all, fields(feeds = self.feeds.len(), channels = self.router.channel_count()))]
    pub async fn run_cycle(&mut self, progress: &dyn ProgressReporter) -> Result<CycleSummary> {
        let started = std::time::Instant::now();
        let cycle_started_at = Utc::now();
        let mut summary = CycleSummary::default();

        // --- Fetching ---
        progress.stage("Fetching feeds");
        let raw_items = self.fetch_all().await;
        summary.fetched = raw_items.len();

        // --- Normalizing + Filtering + Matching + Scoring ---
        progress.stage("Matching against stack");
        let mut alerts: Vec<ScoredAlert> = Vec::new();
        for raw in &raw_items {
            let item = match normalize::normalize(raw) {
                Ok(item) => item,
                Err(e) => {
                    warn!(source = %raw.source, error = %e, "skipping malformed item");
                    summary.malformed += 1;
                    continue;
                }
            };

            // Already-sent items skip match/score work entirely; matching is
            // idempotent so this is purely an optimization.
            if self.record.was_sent(&item.id) {
                summary.duplicates += 1;
                continue;
            }

            let matched = stackwatch_matcher::evaluate(&item, &self.stack);
            if matched.severity_suppressed {
                debug!(item = %item.id, reasons = matched.reasons.len(), "severity gate suppressed match");
                summary.suppressed += 1;
                continue;
            }
            if !matched.is_relevant {
                continue;
            }

            summary.matched += 1;
            alerts.push(score(&item, &matched, cycle_started_at));
        }

        let alerts = order_alerts(alerts, Some(self.settings.max_notifications_per_run));

        // --- Notifying ---
        if self.settings.dry_run {
            progress.stage("Dry run, skipping delivery");
            for alert in &alerts {
                info!(
                    item = %alert.item.id,
                    priority = %alert.priority,
                    score = alert.score,
                    rationale = %alert.rationale,
                    "[dry-run] would notify"
                );
                progress.dry_run_match(alert);
            }
        } else {
            progress.stage("Delivering notifications");
            for alert in &alerts {
                let outcome = self.router.deliver(alert).await;
                if outcome.accepted_any() {
                    // Recording happens after acceptance, never before the
                    // attempt: a delivery failure must not permanently
                    // suppress an item.
                    self.record.mark_sent(&alert.item.id, Utc::now());
                    summary.notified += 1;
                    info!(
                        item = %alert.item.id,
                        priority = %alert.priority,
                        channels = outcome.accepted.len(),
                        "alert delivered"
                    );
                } else {
                    summary.delivery_failed += 1;
                }
            }
        }

        // --- Recording + Pruning ---
        progress.stage("Persisting state");
        self.record.last_poll = Some(cycle_started_at);
        self.record.prune(Utc::now(), RETENTION_DAYS);
        self.store.save(&self.record)?;

        summary.elapsed = started.elapsed();
        info!(
            fetched = summary.fetched,
            malformed = summary.malformed,
            duplicates = summary.duplicates,
            matched = summary.matched,
            suppressed = summary.suppressed,
            notified = summary.notified,
            failed = summary.delivery_failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "cycle complete"
        );
        progress.done(&summary);
        Ok(summary)
    }

    /// Poll continuously until ctrl-c, sleeping `interval` between cycles.
    /// State persisted by completed cycles survives interruption.
    pub async fn run_loop(
        &mut self,
        interval: Duration,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        loop {
            self.run_cycle(progress).await?;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Fetch all enabled feeds concurrently under the feed-concurrency cap
    /// and the global fetch budget. A single feed's failure or timeout only
    /// empties that feed's contribution.
    async fn fetch_all(&self) -> Vec<RawAdvisory> {
        let since = self.record.last_poll;
        let limiter = Arc::new(Semaphore::new(self.settings.max_concurrent_feeds.max(1)));
        let budget = self.settings.fetch_budget;

        let mut tasks: JoinSet<(String, Result<Vec<RawAdvisory>>)> = JoinSet::new();
        for feed in &self.feeds {
            let feed = Arc::clone(feed);
            let limiter = Arc::clone(&limiter);
            tasks.spawn(async move {
                let _permit = limiter.acquire().await.expect("semaphore closed");
                let name = feed.name().to_string();
                let result = match tokio::time::timeout(budget, feed.fetch_recent(since)).await {
                    Ok(result) => result,
                    Err(_) => Err(StackwatchError::feed(&name, "fetch timed out")),
                };
                (name, result)
            });
        }

        let mut raw: Vec<RawAdvisory> = Vec::new();
        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, Ok(items))) => {
                        debug!(feed = %name, count = items.len(), "feed fetched");
                        raw.extend(items);
                    }
                    Ok((name, Err(e))) => {
                        warn!(feed = %name, error = %e, "feed unavailable, continuing without it");
                    }
                    Err(e) => warn!(error = %e, "feed task panicked"),
                }
            }
        };

        if tokio::time::timeout(budget + Duration::from_secs(1), collect)
            .await
            .is_err()
        {
            warn!("global fetch budget exceeded, proceeding with partial results");
        }

        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    use stackwatch_notify::{RetryPolicy, WebhookNotifier};
    use stackwatch_shared::SourceKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// In-memory feed producing fixed raw payloads.
    struct FakeFeed {
        name: &'static str,
        payloads: Vec<serde_json::Value>,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FeedSource for FakeFeed {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch_recent(
            &self,
            _since: Option<chrono::DateTime<Utc>>,
        ) -> Result<Vec<RawAdvisory>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StackwatchError::feed(self.name, "connection refused"));
            }
            Ok(self
                .payloads
                .iter()
                .map(|payload| RawAdvisory {
                    source: SourceKind::Github,
                    payload: payload.clone(),
                })
                .collect())
        }
    }

    fn ghsa_payload(id: &str, package: &str) -> serde_json::Value {
        serde_json::json!({
            "ghsa_id": id,
            "summary": format!("Vulnerability in {package}"),
            "description": "Remote attackers can do bad things.",
            "severity": "critical",
            "published_at": Utc::now().to_rfc3339(),
            "html_url": format!("https://github.com/advisories/{id}"),
            "cvss": {"score": 9.1},
            "vulnerabilities": [{"package": {"ecosystem": "npm", "name": package}}]
        })
    }

    fn stack() -> StackDefinition {
        StackDefinition {
            packages: BTreeMap::from([(
                "npm".to_string(),
                BTreeSet::from(["lodash".to_string()]),
            )]),
            include_low_severity: false,
            ..Default::default()
        }
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            dry_run: false,
            max_notifications_per_run: 20,
            fetch_budget: Duration::from_secs(10),
            max_concurrent_feeds: 4,
        }
    }

    fn temp_store() -> DedupStore {
        let dir = std::env::temp_dir().join(format!("sw-core-test-{}", Uuid::now_v7()));
        DedupStore::new(dir.join("state.json"))
    }

    async fn webhook_router(server: &MockServer, max_attempts: u32) -> NotificationRouter {
        let notifier = WebhookNotifier::new(
            format!("{}/hook", server.uri()),
            Default::default(),
            5,
            RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(5),
            },
        )
        .unwrap();
        NotificationRouter::new(vec![Arc::new(notifier)])
    }

    #[tokio::test]
    async fn cycle_delivers_once_and_dedups_across_cycles() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let calls = Arc::new(AtomicUsize::new(0));
        let feed = Arc::new(FakeFeed {
            name: "fake-ghsa",
            payloads: vec![ghsa_payload("GHSA-cycle-1", "lodash")],
            fail: false,
            calls: calls.clone(),
        });

        let store = temp_store();
        let mut orchestrator = Orchestrator::new(
            vec![feed],
            webhook_router(&server, 2).await,
            stack(),
            store.clone(),
            settings(),
        )
        .unwrap();

        let first = orchestrator.run_cycle(&SilentProgress).await.unwrap();
        assert_eq!(first.matched, 1);
        assert_eq!(first.notified, 1);

        // Same item on the next cycle: filtered before matching, no second
        // delivery (webhook mock expects exactly one POST).
        let second = orchestrator.run_cycle(&SilentProgress).await.unwrap();
        assert_eq!(second.duplicates, 1);
        assert_eq!(second.notified, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Dedup survives a restart via the persisted record.
        let reloaded = store.load().unwrap();
        assert!(reloaded.was_sent("GHSA-cycle-1"));
        assert!(reloaded.last_poll.is_some());

        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }

    #[tokio::test]
    async fn failing_feed_does_not_abort_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let calls = Arc::new(AtomicUsize::new(0));
        let good = Arc::new(FakeFeed {
            name: "good",
            payloads: vec![ghsa_payload("GHSA-good-1", "lodash")],
            fail: false,
            calls: calls.clone(),
        });
        let bad = Arc::new(FakeFeed {
            name: "bad",
            payloads: vec![],
            fail: true,
            calls: calls.clone(),
        });

        let store = temp_store();
        let mut orchestrator = Orchestrator::new(
            vec![good, bad],
            webhook_router(&server, 2).await,
            stack(),
            store.clone(),
            settings(),
        )
        .unwrap();

        let summary = orchestrator.run_cycle(&SilentProgress).await.unwrap();
        assert_eq!(summary.notified, 1);

        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }

    #[tokio::test]
    async fn dry_run_marks_nothing_sent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let feed = Arc::new(FakeFeed {
            name: "fake",
            payloads: vec![ghsa_payload("GHSA-dry-1", "lodash")],
            fail: false,
            calls,
        });

        let store = temp_store();
        let mut cfg = settings();
        cfg.dry_run = true;

        let mut orchestrator = Orchestrator::new(
            vec![feed],
            NotificationRouter::new(vec![]),
            stack(),
            store.clone(),
            cfg,
        )
        .unwrap();

        let summary = orchestrator.run_cycle(&SilentProgress).await.unwrap();
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.notified, 0);

        let reloaded = store.load().unwrap();
        assert!(!reloaded.was_sent("GHSA-dry-1"));
        // The cycle still records its poll time.
        assert!(reloaded.last_poll.is_some());

        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }

    #[tokio::test]
    async fn failed_delivery_leaves_item_unmarked_for_retry_next_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let calls = Arc::new(AtomicUsize::new(0));
        let feed = Arc::new(FakeFeed {
            name: "fake",
            payloads: vec![ghsa_payload("GHSA-fail-1", "lodash")],
            fail: false,
            calls,
        });

        let store = temp_store();
        let mut orchestrator = Orchestrator::new(
            vec![feed],
            webhook_router(&server, 2).await,
            stack(),
            store.clone(),
            settings(),
        )
        .unwrap();

        let summary = orchestrator.run_cycle(&SilentProgress).await.unwrap();
        assert_eq!(summary.notified, 0);
        assert_eq!(summary.delivery_failed, 1);

        // Not marked sent: the item re-enters the pipeline next cycle.
        let reloaded = store.load().unwrap();
        assert!(!reloaded.was_sent("GHSA-fail-1"));

        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }

    #[tokio::test]
    async fn malformed_items_are_skipped_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let calls = Arc::new(AtomicUsize::new(0));
        let feed = Arc::new(FakeFeed {
            name: "fake",
            payloads: vec![
                serde_json::json!({"published_at": "not even a date"}),
                ghsa_payload("GHSA-ok-1", "lodash"),
            ],
            fail: false,
            calls,
        });

        let store = temp_store();
        let mut orchestrator = Orchestrator::new(
            vec![feed],
            webhook_router(&server, 2).await,
            stack(),
            store.clone(),
            settings(),
        )
        .unwrap();

        let summary = orchestrator.run_cycle(&SilentProgress).await.unwrap();
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.notified, 1);

        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }

    #[tokio::test]
    async fn missing_router_without_dry_run_is_a_config_error() {
        let store = temp_store();
        let result = Orchestrator::new(
            vec![],
            NotificationRouter::new(vec![]),
            stack(),
            store,
            settings(),
        );
        assert!(matches!(result, Err(StackwatchError::Config { .. })));
    }
}
