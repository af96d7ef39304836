//! Priority scoring for matched advisories.
//!
//! A weighted linear combination of four independent terms, each clamped to
//! its own sub-range before summing, total clamped to 0..=100:
//!
//! - severity (0–40), interpolated over CVSS when a score is present
//! - exploitability (0–30)
//! - relevance strength (0–20), the maximum across reasons, not a sum
//! - recency (0–10), decaying linearly from 48 hours to 30 days
//!
//! Thresholds and weights are fixed constants, deliberately not
//! configurable.

use chrono::{DateTime, Utc};

use stackwatch_shared::{
    AdvisoryItem, EXPLOIT_PHRASES, MatchResult, Priority, Reason, ReasonKind, ScoredAlert,
    Severity,
};

/// Piecewise-linear CVSS → severity-term anchors, one per band edge.
/// Monotone by construction: raising CVSS never lowers the term.
const CVSS_ANCHORS: [(f64, f64); 5] = [
    (0.0, 0.0),
    (3.9, 8.0),
    (6.9, 18.0),
    (8.9, 30.0),
    (10.0, 40.0),
];

const RECENCY_FULL_HOURS: f64 = 48.0;
const RECENCY_ZERO_HOURS: f64 = 30.0 * 24.0;

/// Convert a relevant match into a scored alert. Callers only invoke this
/// for `match_result.is_relevant` items; a result with no reasons scores on
/// item metadata alone.
pub fn score(item: &AdvisoryItem, match_result: &MatchResult, now: DateTime<Utc>) -> ScoredAlert {
    let severity = severity_term(item);
    let exploit = exploitability_term(item, &match_result.reasons);
    let relevance = relevance_term(&match_result.reasons);
    let recency = recency_term(item, now);

    let total = (severity + exploit + relevance + recency).clamp(0.0, 100.0);
    let score = total.round() as u8;

    ScoredAlert {
        item: item.clone(),
        reasons: match_result.reasons.clone(),
        score,
        priority: priority_for(score),
        rationale: rationale_for(&match_result.reasons),
    }
}

/// Priority buckets from fixed thresholds.
pub fn priority_for(score: u8) -> Priority {
    match score {
        80..=u8::MAX => Priority::P0,
        55..=79 => Priority::P1,
        30..=54 => Priority::P2,
        _ => Priority::P3,
    }
}

// ---------------------------------------------------------------------------
// Terms
// ---------------------------------------------------------------------------

/// 0–40. With a CVSS score, interpolate within the band instead of using the
/// flat per-severity value; without one, map the vendor severity directly.
fn severity_term(item: &AdvisoryItem) -> f64 {
    if let Some(cvss) = item.cvss_score {
        return cvss_lerp(cvss.clamp(0.0, 10.0));
    }
    match item.severity {
        Some(Severity::Critical) => 40.0,
        Some(Severity::High) => 30.0,
        Some(Severity::Medium) => 18.0,
        Some(Severity::Low) => 8.0,
        None => 0.0,
    }
}

fn cvss_lerp(cvss: f64) -> f64 {
    let mut prev = CVSS_ANCHORS[0];
    for anchor in CVSS_ANCHORS.iter().skip(1) {
        if cvss <= anchor.0 {
            let span = anchor.0 - prev.0;
            let t = if span > 0.0 { (cvss - prev.0) / span } else { 1.0 };
            return prev.1 + t * (anchor.1 - prev.1);
        }
        prev = *anchor;
    }
    CVSS_ANCHORS[CVSS_ANCHORS.len() - 1].1
}

/// 0–30. Full weight for exploitation-signal sources; partial weight when a
/// declared keyword from the fixed exploitation list matched.
fn exploitability_term(item: &AdvisoryItem, reasons: &[Reason]) -> f64 {
    if item.exploited {
        return 30.0;
    }
    let keyword_signal = reasons.iter().any(|r| {
        r.kind == ReasonKind::Keyword && EXPLOIT_PHRASES.contains(&r.detail.as_str())
    });
    if keyword_signal { 12.0 } else { 0.0 }
}

/// 0–20. The maximum across collected reasons, not a sum — keyword spam
/// cannot inflate the score.
fn relevance_term(reasons: &[Reason]) -> f64 {
    reasons
        .iter()
        .map(|r| reason_weight(r.kind))
        .fold(0.0, f64::max)
}

fn reason_weight(kind: ReasonKind) -> f64 {
    match kind {
        ReasonKind::DirectDep => 20.0,
        ReasonKind::TransitiveDep => 14.0,
        ReasonKind::Service | ReasonKind::Cloud => 10.0,
        ReasonKind::Keyword => 6.0,
        ReasonKind::Language => 3.0,
    }
}

/// 0–10. Full within 48 hours of evaluation time, linear decay to 0 at 30
/// days, 0 beyond. Future-dated items count as fresh.
fn recency_term(item: &AdvisoryItem, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - item.published).num_minutes() as f64 / 60.0;
    if age_hours <= RECENCY_FULL_HOURS {
        return 10.0;
    }
    if age_hours >= RECENCY_ZERO_HOURS {
        return 0.0;
    }
    10.0 * (RECENCY_ZERO_HOURS - age_hours) / (RECENCY_ZERO_HOURS - RECENCY_FULL_HOURS)
}

/// The single reason with the highest weight contribution; ties resolve to
/// the earlier [`ReasonKind`]. Reasons arrive sorted by kind and weights are
/// non-increasing along that order, so the first reason wins.
fn rationale_for(reasons: &[Reason]) -> String {
    reasons
        .first()
        .map(|r| r.to_string())
        .unwrap_or_else(|| "matched your stack".to_string())
}
