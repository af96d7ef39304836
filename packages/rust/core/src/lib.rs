//! Pipeline orchestration: fetch → normalize → match → score → dedup-filter
//! → notify → record → prune.

pub mod orchestrator;

use chrono::Utc;
use uuid::Uuid;

use stackwatch_shared::{AdvisoryItem, Priority, Reason, ReasonKind, ScoredAlert, SourceKind};

pub use orchestrator::{
    CycleSummary, Orchestrator, OrchestratorSettings, ProgressReporter, SilentProgress,
};

/// Build the synthetic alert used by `stackwatch test-notify` to verify a
/// webhook end to end.
pub fn build_test_alert() -> ScoredAlert {
    let now = Utc::now();
    let item = AdvisoryItem {
        id: format!("test:{}", Uuid::now_v7()),
        source: SourceKind::Rss,
        title: "stackwatch test alert: webhook verified".into(),
        description: "This is a synthetic test notification to verify your webhook.".into(),
        url: "https://github.com/stackwatch/stackwatch".into(),
        published: now,
        severity: Some(stackwatch_shared::Severity::Low),
        cvss_score: None,
        affected_packages: Default::default(),
        exploited: false,
    };
    ScoredAlert {
        reasons: vec![Reason::new(ReasonKind::Keyword, "test notification")],
        score: 1,
        priority: Priority::P3,
        rationale: "keyword match: test notification".into(),
        item,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_ids_are_unique() {
        let a = build_test_alert();
        let b = build_test_alert();
        assert_ne!(a.item.id, b.item.id);
        assert_eq!(a.priority, Priority::P3);
    }
}
