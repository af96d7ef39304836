//! Core domain types for stackwatch advisories and stack matching.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SourceKind
// ---------------------------------------------------------------------------

/// The advisory feed a raw payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Nvd,
    Github,
    Msrc,
    Cisa,
    Osv,
    #[serde(rename = "hn")]
    HackerNews,
    Rss,
}

impl SourceKind {
    /// Short lowercase label used in item ids and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Nvd => "nvd",
            Self::Github => "github",
            Self::Msrc => "msrc",
            Self::Cisa => "cisa",
            Self::Osv => "osv",
            Self::HackerNews => "hn",
            Self::Rss => "rss",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Four-level severity scale advisories are normalized onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Case-insensitive mapping from a source-provided severity string.
    /// Unknown strings yield `None`, never a guessed default.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" | "moderate" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

// ---------------------------------------------------------------------------
// AdvisoryItem
// ---------------------------------------------------------------------------

/// Phrases that signal active exploitation in advisory text. Used by the
/// normalizer to set [`AdvisoryItem::exploited`] and by the scorer to weight
/// matching keyword reasons.
pub const EXPLOIT_PHRASES: [&str; 4] = [
    "exploited in the wild",
    "actively exploited",
    "active exploitation",
    "in the wild",
];

/// Case-insensitive check for any exploitation phrase.
pub fn contains_exploit_phrase(text: &str) -> bool {
    let lowered = text.to_lowercase();
    EXPLOIT_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

/// One normalized feed entry.
///
/// `id` is immutable once assigned and is the sole identity key used for
/// dedup. Sources whose upstream identifiers are not inherently unique get a
/// source prefix during normalization (e.g. `cisa:CVE-2024-1234`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryItem {
    pub id: String,
    pub source: SourceKind,
    pub title: String,
    pub description: String,
    pub url: String,
    pub published: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss_score: Option<f64>,
    /// Affected package names, ecosystem-qualified where known
    /// (e.g. `npm:lodash`). Best-effort; may be empty.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub affected_packages: BTreeSet<String>,
    /// True if the item came from an exploitation-signal source (CISA KEV)
    /// or its text matches an exploitation phrase.
    #[serde(default)]
    pub exploited: bool,
}

impl AdvisoryItem {
    /// Combined lowercase haystack used for text matching.
    pub fn search_text(&self) -> String {
        format!("{} {}", self.title, self.description).to_lowercase()
    }
}

// ---------------------------------------------------------------------------
// StackDefinition
// ---------------------------------------------------------------------------

/// Matching mode for textual signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Exact, case-normalized whole-token matches only.
    Strict,
    /// Alias/synonym expansion plus substring containment with
    /// word-boundary guards for short tokens.
    #[default]
    Loose,
}

/// Normalize a package name the way its ecosystem's registry does.
/// PyPI treats `_`, `-`, and `.` as equivalent; npm advisories rarely
/// distinguish `_` from `-`.
pub fn normalize_package_name(name: &str, ecosystem: &str) -> String {
    let lowered = name.trim().to_lowercase();
    match ecosystem {
        "pip" | "pypi" => lowered.replace(['_', '.'], "-"),
        "npm" => lowered.replace('_', "-"),
        _ => lowered,
    }
}

/// Declared and discovered package dependencies, keyed by ecosystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    #[serde(default)]
    pub direct: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub transitive: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn add_direct(&mut self, ecosystem: &str, names: impl IntoIterator<Item = String>) {
        let entry = self.direct.entry(ecosystem.to_lowercase()).or_default();
        entry.extend(names);
    }

    pub fn add_transitive(&mut self, ecosystem: &str, names: impl IntoIterator<Item = String>) {
        let entry = self.transitive.entry(ecosystem.to_lowercase()).or_default();
        entry.extend(names);
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.transitive.is_empty()
    }
}

/// The user-declared technology footprint, immutable for a run.
#[derive(Debug, Clone, Default)]
pub struct StackDefinition {
    pub cloud: BTreeSet<String>,
    pub languages: BTreeSet<String>,
    pub services: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    /// Directly declared packages, ecosystem → names.
    pub packages: BTreeMap<String, BTreeSet<String>>,
    /// Optional augmentation discovered from manifests/lockfiles.
    pub dependencies: DependencyGraph,
    pub match_mode: MatchMode,
    /// When false, items with a CVSS score below 4.0 are suppressed even if
    /// they match the stack.
    pub include_low_severity: bool,
}

// ---------------------------------------------------------------------------
// MatchResult
// ---------------------------------------------------------------------------

/// Why an item matched the stack. Variants are declared in evaluation order;
/// that order is also the confidence order used for rationale tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKind {
    DirectDep,
    TransitiveDep,
    Service,
    Cloud,
    Keyword,
    Language,
}

impl ReasonKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::DirectDep => "direct dependency",
            Self::TransitiveDep => "transitive dependency",
            Self::Service => "service",
            Self::Cloud => "cloud",
            Self::Keyword => "keyword",
            Self::Language => "language",
        }
    }
}

/// A single match reason, deduplicated by `(kind, detail)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reason {
    pub kind: ReasonKind,
    pub detail: String,
}

impl Reason {
    pub fn new(kind: ReasonKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} match: {}", self.kind.label(), self.detail)
    }
}

/// Output of the matcher for one (item, stack) pair.
///
/// `is_relevant` implies reasons is non-empty. The converse holds except when
/// the severity gate fires: reasons are retained for diagnostics while
/// `is_relevant` is forced false, recorded via `severity_suppressed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub is_relevant: bool,
    /// Ordered by [`ReasonKind`] evaluation order, then detail; stable for
    /// identical inputs.
    pub reasons: Vec<Reason>,
    pub severity_suppressed: bool,
}

// ---------------------------------------------------------------------------
// ScoredAlert
// ---------------------------------------------------------------------------

/// Priority bucket derived from the numeric score via fixed thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl Priority {
    pub fn label(&self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A relevant, scored advisory ready for delivery.
#[derive(Debug, Clone)]
pub struct ScoredAlert {
    pub item: AdvisoryItem,
    pub reasons: Vec<Reason>,
    /// 0..=100.
    pub score: u8,
    pub priority: Priority,
    /// The single top-weighted contributing reason, human-readable.
    pub rationale: String,
}
