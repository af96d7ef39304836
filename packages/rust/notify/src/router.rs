//! Fan-out of scored alerts to the configured channels.

use std::cmp::Reverse;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info};

use stackwatch_shared::ScoredAlert;

use crate::{AlertPayload, Notifier};

/// Per-channel result of one alert's delivery.
#[derive(Debug, Default)]
pub struct DeliveryOutcome {
    pub accepted: Vec<String>,
    pub failed: Vec<String>,
}

impl DeliveryOutcome {
    /// At-least-one-channel semantics: the item is marked sent store-wide
    /// when any configured channel accepted it.
    pub fn accepted_any(&self) -> bool {
        !self.accepted.is_empty()
    }
}

/// Order alerts for delivery: priority ascending (P0 first), score
/// descending within a priority, published time descending as the final
/// tie-break. An optional cap truncates the lowest-priority tail, never
/// reorders.
pub fn order_alerts(mut alerts: Vec<ScoredAlert>, max_per_run: Option<usize>) -> Vec<ScoredAlert> {
    alerts.sort_by_key(|alert| {
        (
            alert.priority,
            Reverse(alert.score),
            Reverse(alert.item.published),
        )
    });
    if let Some(cap) = max_per_run {
        if alerts.len() > cap {
            info!(dropped = alerts.len() - cap, cap, "notification cap reached, dropping tail");
            alerts.truncate(cap);
        }
    }
    alerts
}

/// Fans one alert out to every configured channel concurrently.
pub struct NotificationRouter {
    channels: Vec<Arc<dyn Notifier>>,
}

impl NotificationRouter {
    pub fn new(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self { channels }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Deliver one alert to all channels, waiting for every channel to
    /// resolve (success or exhausted retries).
    pub async fn deliver(&self, alert: &ScoredAlert) -> DeliveryOutcome {
        let payload = Arc::new(AlertPayload::from_alert(alert));
        let mut tasks: JoinSet<(String, stackwatch_shared::Result<()>)> = JoinSet::new();

        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let payload = Arc::clone(&payload);
            tasks.spawn(async move {
                let name = channel.name().to_string();
                let result = channel.send(&payload).await;
                (name, result)
            });
        }

        let mut outcome = DeliveryOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => outcome.accepted.push(name),
                Ok((name, Err(e))) => {
                    error!(item = %alert.item.id, channel = %name, error = %e, "channel delivery failed");
                    outcome.failed.push(name);
                }
                Err(e) => {
                    error!(item = %alert.item.id, error = %e, "delivery task panicked");
                }
            }
        }

        outcome.accepted.sort();
        outcome.failed.sort();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use stackwatch_shared::Priority;

    use crate::channels::WebhookNotifier;
    use crate::retry::RetryPolicy;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alert(priority: Priority, score: u8, age_hours: i64) -> ScoredAlert {
        let mut alert = crate::tests::sample_alert();
        alert.priority = priority;
        alert.score = score;
        alert.item.id = format!("test:{priority}:{score}:{age_hours}");
        alert.item.published = Utc::now() - Duration::hours(age_hours);
        alert
    }

    #[test]
    fn ordering_is_priority_then_score_then_recency() {
        let alerts = vec![
            alert(Priority::P2, 40, 1),
            alert(Priority::P0, 85, 5),
            alert(Priority::P1, 60, 1),
            alert(Priority::P0, 95, 1),
            alert(Priority::P1, 60, 10),
        ];

        let ordered = order_alerts(alerts, None);
        let keys: Vec<(Priority, u8)> = ordered.iter().map(|a| (a.priority, a.score)).collect();
        assert_eq!(
            keys,
            vec![
                (Priority::P0, 95),
                (Priority::P0, 85),
                (Priority::P1, 60),
                (Priority::P1, 60),
                (Priority::P2, 40),
            ]
        );
        // Equal priority and score: newer first.
        assert!(ordered[2].item.published > ordered[3].item.published);
    }

    #[test]
    fn cap_drops_the_lowest_priority_tail() {
        let alerts = vec![
            alert(Priority::P3, 10, 1),
            alert(Priority::P0, 90, 1),
            alert(Priority::P2, 40, 1),
        ];

        let ordered = order_alerts(alerts, Some(2));
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].priority, Priority::P0);
        assert_eq!(ordered[1].priority, Priority::P2);
    }

    #[tokio::test]
    async fn at_least_one_channel_acceptance() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fast_retry = RetryPolicy {
            max_attempts: 2,
            base_delay: std::time::Duration::from_millis(5),
        };
        let ok = WebhookNotifier::new(
            format!("{}/ok", server.uri()),
            Default::default(),
            5,
            fast_retry.clone(),
        )
        .unwrap();
        let down = WebhookNotifier::new(
            format!("{}/down", server.uri()),
            Default::default(),
            5,
            fast_retry,
        )
        .unwrap();

        let router = NotificationRouter::new(vec![Arc::new(ok), Arc::new(down)]);
        let outcome = router.deliver(&crate::tests::sample_alert()).await;

        assert!(outcome.accepted_any());
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
    }
}
