//! Stack-aware relevance matching for normalized advisories.
//!
//! [`evaluate`] collects every applicable match reason for an (item, stack)
//! pair — matching is inclusive, not short-circuiting — then applies the
//! severity gate as a hard override. Reasons are deduplicated by
//! `(kind, detail)` and ordered by evaluation order, so output is
//! deterministic for identical inputs.

pub mod deps;
pub mod score;

use std::collections::BTreeSet;

use stackwatch_shared::{
    AdvisoryItem, MatchMode, MatchResult, Reason, ReasonKind, StackDefinition,
};

/// CVSS scores below this are suppressed unless `include_low_severity` is set.
pub const LOW_SEVERITY_CVSS: f64 = 4.0;

/// Tokens at or below this length require a word-boundary match; bare
/// substring containment would fire on unrelated words (`go` in
/// `algorithm`, `sql` in `sqlite`).
const SHORT_TOKEN_LEN: usize = 4;

/// Fixed alias table applied in loose mode before substring search.
/// Declared canonical tokens also match their aliases and vice versa.
const ALIASES: &[(&str, &[&str])] = &[
    ("kubernetes", &["k8s", "aks", "eks", "gke"]),
    ("aws", &["amazon web services"]),
    ("azure", &["entra id", "azure ad"]),
    ("postgres", &["postgresql"]),
    ("gcp", &["google cloud"]),
];

/// Decide relevance of `item` against `stack` and produce match reasons.
///
/// All branches are evaluated in a fixed order: direct dependency,
/// transitive dependency, package text mention, service, cloud, keyword,
/// language. The severity gate is applied after reason collection, not as a
/// pre-filter, so diagnostics still show why an item would have matched.
pub fn evaluate(item: &AdvisoryItem, stack: &StackDefinition) -> MatchResult {
    let text = item.search_text();
    let mut reasons: BTreeSet<Reason> = BTreeSet::new();

    match_declared_packages(item, stack, &mut reasons);
    match_package_mentions(&text, stack, &mut reasons);
    match_token_lists(&text, &stack.services, ReasonKind::Service, stack.match_mode, &mut reasons);
    match_token_lists(&text, &stack.cloud, ReasonKind::Cloud, stack.match_mode, &mut reasons);
    match_token_lists(&text, &stack.keywords, ReasonKind::Keyword, stack.match_mode, &mut reasons);
    match_languages(&text, stack, &mut reasons);

    let reasons: Vec<Reason> = reasons.into_iter().collect();

    // Hard override: low-CVSS items never notify, but their reasons are kept
    // so a dry run can explain what was suppressed.
    let severity_suppressed = !stack.include_low_severity
        && item
            .cvss_score
            .is_some_and(|cvss| cvss < LOW_SEVERITY_CVSS)
        && !reasons.is_empty();

    MatchResult {
        is_relevant: !reasons.is_empty() && !severity_suppressed,
        reasons,
        severity_suppressed,
    }
}

// ---------------------------------------------------------------------------
// Package matching
// ---------------------------------------------------------------------------

/// Steps 1–2: intersect the item's affected packages against declared direct
/// packages and discovered direct/transitive dependencies, case-insensitive.
fn match_declared_packages(
    item: &AdvisoryItem,
    stack: &StackDefinition,
    reasons: &mut BTreeSet<Reason>,
) {
    // Ecosystems an unqualified package name is tried against.
    let known_ecosystems: Vec<&str> = stack
        .packages
        .keys()
        .chain(stack.dependencies.direct.keys())
        .chain(stack.dependencies.transitive.keys())
        .map(String::as_str)
        .collect();

    for entry in &item.affected_packages {
        let (ecosystem, name) = split_qualified(entry);

        if let Some(hit) = find_in_package_map(
            ecosystem.as_deref(),
            &name,
            &known_ecosystems,
            |eco, n| in_direct_packages(stack, eco, n),
        ) {
            reasons.insert(Reason::new(ReasonKind::DirectDep, hit));
            continue;
        }

        if let Some(hit) = find_in_package_map(
            ecosystem.as_deref(),
            &name,
            &known_ecosystems,
            |eco, n| {
                stack
                    .dependencies
                    .transitive
                    .get(eco)
                    .is_some_and(|set| set.contains(n))
            },
        ) {
            reasons.insert(Reason::new(ReasonKind::TransitiveDep, hit));
        }
    }
}

/// Step 3: substring search of declared package names inside the combined
/// text, independent of whether affected-package metadata was available.
fn match_package_mentions(text: &str, stack: &StackDefinition, reasons: &mut BTreeSet<Reason>) {
    let direct = stack
        .packages
        .iter()
        .chain(stack.dependencies.direct.iter());

    for (ecosystem, names) in direct {
        for name in names {
            let normalized = deps::normalize_package_name(name, ecosystem);
            if contains_token(text, &normalized, stack.match_mode) {
                reasons.insert(Reason::new(ReasonKind::DirectDep, normalized));
            }
        }
    }
}

/// Split an optionally ecosystem-qualified package entry (`npm:lodash`).
fn split_qualified(entry: &str) -> (Option<String>, String) {
    match entry.split_once(':') {
        Some((eco, name)) if !eco.is_empty() && !name.is_empty() => {
            (Some(eco.to_lowercase()), name.to_lowercase())
        }
        _ => (None, entry.to_lowercase()),
    }
}

/// Look a package up in the stack's maps: in its own ecosystem when
/// qualified, across every ecosystem the stack declares otherwise. Returns
/// the normalized name on a hit.
fn find_in_package_map(
    ecosystem: Option<&str>,
    name: &str,
    known_ecosystems: &[&str],
    lookup: impl Fn(&str, &str) -> bool,
) -> Option<String> {
    match ecosystem {
        Some(eco) => {
            let normalized = deps::normalize_package_name(name, eco);
            lookup(eco, &normalized).then_some(normalized)
        }
        None => {
            for eco in known_ecosystems {
                let normalized = deps::normalize_package_name(name, eco);
                if lookup(eco, &normalized) {
                    return Some(normalized);
                }
            }
            None
        }
    }
}

fn in_direct_packages(stack: &StackDefinition, ecosystem: &str, name: &str) -> bool {
    stack
        .packages
        .get(ecosystem)
        .is_some_and(|set| set.contains(name))
        || stack
            .dependencies
            .direct
            .get(ecosystem)
            .is_some_and(|set| set.contains(name))
}

// ---------------------------------------------------------------------------
// Text matching
// ---------------------------------------------------------------------------

/// Steps 4–5: match a declared token list against the combined text,
/// expanding aliases in loose mode. The reason detail is always the declared
/// (canonical) token, not the alias that fired.
fn match_token_lists(
    text: &str,
    tokens: &BTreeSet<String>,
    kind: ReasonKind,
    mode: MatchMode,
    reasons: &mut BTreeSet<Reason>,
) {
    for token in tokens {
        if token_matches(text, token, mode) {
            reasons.insert(Reason::new(kind, token.clone()));
        }
    }
}

/// Step 6: language tokens. Short identifiers (`go`, `c`, `sql`) are only
/// counted on a word-boundary match, which [`contains_token`] enforces for
/// any token of length ≤ 4.
fn match_languages(text: &str, stack: &StackDefinition, reasons: &mut BTreeSet<Reason>) {
    for language in &stack.languages {
        if token_matches(text, language, stack.match_mode) {
            reasons.insert(Reason::new(ReasonKind::Language, language.clone()));
        }
    }
}

/// Check a declared token, including its alias expansion in loose mode.
fn token_matches(text: &str, token: &str, mode: MatchMode) -> bool {
    if contains_token(text, token, mode) {
        return true;
    }
    if mode == MatchMode::Loose {
        for alias in alias_expansion(token) {
            if contains_token(text, alias, mode) {
                return true;
            }
        }
    }
    false
}

/// All alternative spellings of a token per the fixed alias table:
/// the canonical form and its sibling aliases, whichever side was declared.
fn alias_expansion(token: &str) -> Vec<&'static str> {
    for (canonical, aliases) in ALIASES {
        if *canonical == token {
            return aliases.to_vec();
        }
        if aliases.contains(&token) {
            let mut expansion = vec![*canonical];
            expansion.extend(aliases.iter().filter(|a| **a != token));
            return expansion;
        }
    }
    Vec::new()
}

/// Token containment with word-boundary guards.
///
/// Strict mode requires a whole-token match for every token; loose mode only
/// for tokens of length ≤ [`SHORT_TOKEN_LEN`], falling back to substring
/// containment for longer ones.
fn contains_token(text: &str, token: &str, mode: MatchMode) -> bool {
    let token = token.trim();
    if token.is_empty() {
        return false;
    }
    let bounded = mode == MatchMode::Strict || token.len() <= SHORT_TOKEN_LEN;
    if !bounded {
        return text.contains(token);
    }
    let pattern = format!(r"\b{}\b", regex::escape(token));
    regex::Regex::new(&pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};
    use stackwatch_shared::SourceKind;

    fn item(title: &str, description: &str) -> AdvisoryItem {
        AdvisoryItem {
            id: "test:1".into(),
            source: SourceKind::Rss,
            title: title.into(),
            description: description.into(),
            url: "https://example.com".into(),
            published: Utc::now(),
            severity: None,
            cvss_score: None,
            affected_packages: BTreeSet::new(),
            exploited: false,
        }
    }

    fn stack() -> StackDefinition {
        StackDefinition {
            cloud: BTreeSet::from(["azure".to_string()]),
            languages: BTreeSet::from(["go".to_string(), "python".to_string()]),
            services: BTreeSet::from(["kubernetes".to_string()]),
            keywords: BTreeSet::from(["oauth".to_string()]),
            packages: BTreeMap::from([(
                "npm".to_string(),
                BTreeSet::from(["lodash".to_string()]),
            )]),
            dependencies: Default::default(),
            match_mode: MatchMode::Loose,
            include_low_severity: true,
        }
    }

    #[test]
    fn direct_package_match_via_metadata() {
        let mut it = item("Prototype pollution", "affects a popular utility library");
        it.affected_packages.insert("npm:lodash".into());

        let result = evaluate(&it, &stack());
        assert!(result.is_relevant);
        assert!(result
            .reasons
            .iter()
            .any(|r| r.kind == ReasonKind::DirectDep && r.detail == "lodash"));
    }

    #[test]
    fn transitive_match_requires_graph() {
        let mut it = item("Advisory", "deep dependency issue");
        it.affected_packages.insert("npm:minimist".into());

        let mut s = stack();
        let result = evaluate(&it, &s);
        assert!(!result.is_relevant);

        s.dependencies
            .add_transitive("npm", ["minimist".to_string()]);
        let result = evaluate(&it, &s);
        assert!(result.is_relevant);
        assert_eq!(result.reasons[0].kind, ReasonKind::TransitiveDep);
    }

    #[test]
    fn package_mention_fires_without_metadata() {
        let it = item("lodash prototype pollution reported", "details pending");
        let result = evaluate(&it, &stack());
        assert!(result.is_relevant);
        assert!(result
            .reasons
            .iter()
            .any(|r| r.kind == ReasonKind::DirectDep && r.detail == "lodash"));
    }

    #[test]
    fn alias_expansion_in_loose_mode() {
        let it = item("K8s privilege escalation", "affects k8s clusters before 1.29");
        let result = evaluate(&it, &stack());
        assert!(result.is_relevant);
        assert!(result
            .reasons
            .iter()
            .any(|r| r.kind == ReasonKind::Service && r.detail == "kubernetes"));
    }

    #[test]
    fn strict_mode_disables_aliases() {
        let it = item("K8s privilege escalation", "affects k8s clusters");
        let mut s = stack();
        s.match_mode = MatchMode::Strict;
        let result = evaluate(&it, &s);
        assert!(!result.is_relevant);
    }

    #[test]
    fn strict_mode_still_matches_whole_tokens() {
        let it = item("Kubernetes privilege escalation", "cluster takeover");
        let mut s = stack();
        s.match_mode = MatchMode::Strict;
        let result = evaluate(&it, &s);
        assert!(result.is_relevant);
    }

    #[test]
    fn short_token_needs_word_boundary() {
        // "algorithm" contains "go" as a substring; it must not fire.
        let it = item("New hashing algorithm announced", "faster digests");
        let result = evaluate(&it, &stack());
        assert!(!result.is_relevant);

        let it = item("Go runtime vulnerability", "affects the go linker");
        let result = evaluate(&it, &stack());
        assert!(result
            .reasons
            .iter()
            .any(|r| r.kind == ReasonKind::Language && r.detail == "go"));
    }

    #[test]
    fn severity_gate_overrides_direct_match() {
        let mut it = item("Low severity issue", "minor leak");
        it.affected_packages.insert("npm:lodash".into());
        it.cvss_score = Some(3.9);

        let mut s = stack();
        s.include_low_severity = false;
        let result = evaluate(&it, &s);

        assert!(!result.is_relevant);
        assert!(result.severity_suppressed);
        // Reasons are retained for diagnostics.
        assert!(!result.reasons.is_empty());
    }

    #[test]
    fn severity_gate_passes_at_threshold() {
        let mut it = item("Moderate issue", "token leak");
        it.affected_packages.insert("npm:lodash".into());
        it.cvss_score = Some(4.0);

        let mut s = stack();
        s.include_low_severity = false;
        assert!(evaluate(&it, &s).is_relevant);
    }

    #[test]
    fn keyword_gate_scenario() {
        // Keyword matches but CVSS 2.0 with the gate active suppresses it.
        let mut it = item("Token disclosure", "an oauth token leak was reported");
        it.cvss_score = Some(2.0);
        let mut s = stack();
        s.include_low_severity = false;

        let result = evaluate(&it, &s);
        assert!(!result.is_relevant);
        assert!(result.severity_suppressed);
        assert!(result
            .reasons
            .iter()
            .any(|r| r.kind == ReasonKind::Keyword && r.detail == "oauth"));
    }

    #[test]
    fn reasons_ordered_by_kind_and_deduplicated() {
        let mut it = item(
            "Kubernetes oauth bypass in lodash",
            "lodash and kubernetes and oauth, again: lodash",
        );
        it.affected_packages.insert("npm:lodash".into());

        let first = evaluate(&it, &stack());
        let second = evaluate(&it, &stack());
        assert_eq!(first, second);

        let kinds: Vec<ReasonKind> = first.reasons.iter().map(|r| r.kind).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);

        // "lodash" appears via metadata and text mention; one reason only.
        let direct: Vec<_> = first
            .reasons
            .iter()
            .filter(|r| r.kind == ReasonKind::DirectDep)
            .collect();
        assert_eq!(direct.len(), 1);
    }

    #[test]
    fn no_match_yields_irrelevant() {
        let it = item("Unrelated firmware note", "nothing to see");
        let result = evaluate(&it, &stack());
        assert!(!result.is_relevant);
        assert!(result.reasons.is_empty());
        assert!(!result.severity_suppressed);
    }
}
