//! Normalization of raw feed payloads into [`AdvisoryItem`]s.
//!
//! Pure functions: a payload either maps to an item or fails with
//! [`StackwatchError::Malformed`], which callers log and skip. Severity is
//! mapped case-insensitively onto the four-level scale (unknown stays
//! absent, never guessed); CVSS is carried only as a numeric 0.0–10.0
//! value; affected-package extraction is best-effort and its failure only
//! narrows matching signal.

use chrono::{DateTime, Utc};
use serde_json::Value;

use stackwatch_shared::{
    AdvisoryItem, Result, Severity, SourceKind, StackwatchError, contains_exploit_phrase,
};

use crate::RawAdvisory;
use crate::sources::cisa::date_added;
use crate::sources::rss::parse_feed_date;

/// Map a raw feed payload into the canonical item shape.
pub fn normalize(raw: &RawAdvisory) -> Result<AdvisoryItem> {
    let mut item = match raw.source {
        SourceKind::Nvd => normalize_nvd(&raw.payload)?,
        SourceKind::Github => normalize_github(&raw.payload)?,
        SourceKind::Osv => normalize_osv(&raw.payload)?,
        SourceKind::Cisa => normalize_cisa(&raw.payload)?,
        SourceKind::Msrc => normalize_msrc(&raw.payload)?,
        SourceKind::HackerNews => normalize_hackernews(&raw.payload)?,
        SourceKind::Rss => normalize_rss(&raw.payload)?,
    };

    // Exploitation signal: the KEV catalog is authoritative; otherwise the
    // text has to say so.
    item.exploited = raw.source == SourceKind::Cisa
        || contains_exploit_phrase(&format!("{} {}", item.title, item.description));
    Ok(item)
}

// ---------------------------------------------------------------------------
// Per-source mappings
// ---------------------------------------------------------------------------

fn normalize_nvd(payload: &Value) -> Result<AdvisoryItem> {
    let cve_id = required_str(payload, "id", SourceKind::Nvd)?;
    let published = required_date(payload, "published", SourceKind::Nvd)?;

    let description = english_description(payload.get("descriptions"));
    let title = match description.split('.').next() {
        Some(first) if !first.trim().is_empty() => format!("{cve_id}: {first}"),
        _ => cve_id.to_string(),
    };

    let (cvss_score, severity) = nvd_cvss(payload.get("metrics"));

    Ok(AdvisoryItem {
        // CVE ids are globally unique; no source prefix needed.
        id: cve_id.to_string(),
        source: SourceKind::Nvd,
        title,
        description,
        url: format!("https://nvd.nist.gov/vuln/detail/{cve_id}"),
        published,
        severity,
        cvss_score,
        affected_packages: nvd_cpe_products(payload.get("configurations")),
        exploited: false,
    })
}

fn normalize_github(payload: &Value) -> Result<AdvisoryItem> {
    let ghsa_id = required_str(payload, "ghsa_id", SourceKind::Github)?;
    let published = required_date(payload, "published_at", SourceKind::Github)?;

    let summary = str_field(payload, "summary");
    let title = match summary {
        Some(summary) => format!("{ghsa_id}: {summary}"),
        None => ghsa_id.to_string(),
    };
    let description = str_field(payload, "description")
        .or(str_field(payload, "summary"))
        .unwrap_or_default()
        .to_string();

    let severity = str_field(payload, "severity").and_then(Severity::parse);
    let cvss_score = payload
        .pointer("/cvss/score")
        .and_then(Value::as_f64)
        .filter(|score| (0.0..=10.0).contains(score));

    let mut affected_packages = std::collections::BTreeSet::new();
    if let Some(vulnerabilities) = payload.get("vulnerabilities").and_then(Value::as_array) {
        for vuln in vulnerabilities {
            let name = vuln.pointer("/package/name").and_then(Value::as_str);
            let ecosystem = vuln.pointer("/package/ecosystem").and_then(Value::as_str);
            if let Some(name) = name {
                affected_packages.insert(qualify(ecosystem, name));
            }
        }
    }

    Ok(AdvisoryItem {
        id: ghsa_id.to_string(),
        source: SourceKind::Github,
        title,
        description,
        url: str_field(payload, "html_url").unwrap_or_default().to_string(),
        published,
        severity,
        cvss_score,
        affected_packages,
        exploited: false,
    })
}

fn normalize_osv(payload: &Value) -> Result<AdvisoryItem> {
    let vuln_id = required_str(payload, "id", SourceKind::Osv)?;
    let published = required_date(payload, "published", SourceKind::Osv)?;

    let summary = str_field(payload, "summary");
    let title = match summary {
        Some(summary) => format!("{vuln_id}: {summary}"),
        None => vuln_id.to_string(),
    };
    let description = str_field(payload, "details")
        .or(summary)
        .unwrap_or_default()
        .to_string();

    let url = payload
        .get("references")
        .and_then(Value::as_array)
        .and_then(|refs| {
            refs.iter()
                .find_map(|r| r.get("url").and_then(Value::as_str))
        })
        .unwrap_or_default()
        .to_string();

    let mut affected_packages = std::collections::BTreeSet::new();
    if let Some(affected) = payload.get("affected").and_then(Value::as_array) {
        for entry in affected {
            let name = entry.pointer("/package/name").and_then(Value::as_str);
            let ecosystem = entry
                .pointer("/package/ecosystem")
                .and_then(Value::as_str)
                .map(internal_ecosystem);
            if let Some(name) = name {
                affected_packages.insert(qualify(ecosystem, name));
            }
        }
    }

    Ok(AdvisoryItem {
        id: format!("osv:{vuln_id}"),
        source: SourceKind::Osv,
        title,
        description,
        url,
        published,
        severity: None,
        cvss_score: None,
        affected_packages,
        exploited: false,
    })
}

fn normalize_cisa(payload: &Value) -> Result<AdvisoryItem> {
    let cve_id = required_str(payload, "cveID", SourceKind::Cisa)?;
    let published = date_added(payload).ok_or_else(|| {
        StackwatchError::malformed(SourceKind::Cisa.label(), "missing or invalid dateAdded")
    })?;

    let name = str_field(payload, "vulnerabilityName").unwrap_or(cve_id);

    Ok(AdvisoryItem {
        id: format!("cisa:{cve_id}"),
        source: SourceKind::Cisa,
        title: format!("{cve_id}: {name}"),
        description: str_field(payload, "shortDescription")
            .unwrap_or_default()
            .to_string(),
        url: format!("https://nvd.nist.gov/vuln/detail/{cve_id}"),
        published,
        severity: None,
        cvss_score: None,
        affected_packages: Default::default(),
        exploited: false, // set by the caller for every KEV entry
    })
}

fn normalize_msrc(payload: &Value) -> Result<AdvisoryItem> {
    let guid = str_field(payload, "guid")
        .or(str_field(payload, "link"))
        .ok_or_else(|| StackwatchError::malformed(SourceKind::Msrc.label(), "missing guid"))?
        .to_string();
    let published = feed_date(payload, "published", SourceKind::Msrc)?;

    Ok(AdvisoryItem {
        id: format!("msrc:{guid}"),
        source: SourceKind::Msrc,
        title: str_field(payload, "title").unwrap_or(&guid).to_string(),
        description: str_field(payload, "description")
            .unwrap_or_default()
            .to_string(),
        url: str_field(payload, "link").unwrap_or_default().to_string(),
        published,
        severity: None,
        cvss_score: None,
        affected_packages: Default::default(),
        exploited: false,
    })
}

fn normalize_hackernews(payload: &Value) -> Result<AdvisoryItem> {
    let object_id = required_str(payload, "objectID", SourceKind::HackerNews)?;
    let published = required_date(payload, "created_at", SourceKind::HackerNews)?;

    let title = str_field(payload, "title")
        .unwrap_or("Hacker News story")
        .to_string();
    let url = str_field(payload, "url")
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://news.ycombinator.com/item?id={object_id}"));

    Ok(AdvisoryItem {
        id: format!("hn:{object_id}"),
        source: SourceKind::HackerNews,
        description: str_field(payload, "story_text")
            .unwrap_or(&title)
            .to_string(),
        title,
        url,
        published,
        severity: None,
        cvss_score: None,
        affected_packages: Default::default(),
        exploited: false,
    })
}

fn normalize_rss(payload: &Value) -> Result<AdvisoryItem> {
    let source_name = required_str(payload, "source_name", SourceKind::Rss)?;
    let guid = required_str(payload, "guid", SourceKind::Rss)?;
    let published = feed_date(payload, "published", SourceKind::Rss)?;

    let title = str_field(payload, "title").unwrap_or(source_name).to_string();

    Ok(AdvisoryItem {
        id: format!("rss:{source_name}:{guid}"),
        source: SourceKind::Rss,
        description: str_field(payload, "description")
            .unwrap_or_default()
            .to_string(),
        title,
        url: str_field(payload, "link").unwrap_or_default().to_string(),
        published,
        severity: None,
        cvss_score: None,
        affected_packages: Default::default(),
        exploited: false,
    })
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn required_str<'a>(payload: &'a Value, key: &str, source: SourceKind) -> Result<&'a str> {
    str_field(payload, key)
        .ok_or_else(|| StackwatchError::malformed(source.label(), format!("missing {key}")))
}

fn required_date(payload: &Value, key: &str, source: SourceKind) -> Result<DateTime<Utc>> {
    let value = required_str(payload, key, source)?;
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StackwatchError::malformed(source.label(), format!("bad {key}: {e}")))
}

/// Feed dates come in RFC 2822 or RFC 3339 depending on the publisher.
fn feed_date(payload: &Value, key: &str, source: SourceKind) -> Result<DateTime<Utc>> {
    let value = required_str(payload, key, source)?;
    parse_feed_date(value)
        .ok_or_else(|| StackwatchError::malformed(source.label(), format!("bad {key}: {value}")))
}

fn qualify(ecosystem: Option<&str>, name: &str) -> String {
    match ecosystem {
        Some(eco) if !eco.is_empty() => format!("{}:{}", eco.to_lowercase(), name.to_lowercase()),
        _ => name.to_lowercase(),
    }
}

/// OSV ecosystem names → the internal labels used in stack config.
fn internal_ecosystem(osv: &str) -> &str {
    match osv {
        "PyPI" => "pip",
        "crates.io" => "crates",
        "Go" => "go",
        "RubyGems" => "rubygems",
        "Maven" => "maven",
        "NuGet" => "nuget",
        other => other,
    }
}

fn english_description(descriptions: Option<&Value>) -> String {
    descriptions
        .and_then(Value::as_array)
        .and_then(|list| {
            list.iter()
                .find(|d| d.get("lang").and_then(Value::as_str) == Some("en"))
                .and_then(|d| d.get("value").and_then(Value::as_str))
        })
        .unwrap_or_default()
        .to_string()
}

fn nvd_cvss(metrics: Option<&Value>) -> (Option<f64>, Option<Severity>) {
    let Some(metrics) = metrics else {
        return (None, None);
    };
    let entries = metrics
        .get("cvssMetricV31")
        .or_else(|| metrics.get("cvssMetricV30"))
        .and_then(Value::as_array);
    let Some(first) = entries.and_then(|list| list.first()) else {
        return (None, None);
    };

    let score = first
        .pointer("/cvssData/baseScore")
        .and_then(Value::as_f64)
        .filter(|score| (0.0..=10.0).contains(score));
    let severity = first
        .pointer("/cvssData/baseSeverity")
        .or_else(|| first.get("baseSeverity"))
        .and_then(Value::as_str)
        .and_then(Severity::parse);
    (score, severity)
}

/// Pull CPE product segments out of an NVD configurations block:
/// `cpe:2.3:a:vendor:product:...` → `product`.
fn nvd_cpe_products(configurations: Option<&Value>) -> std::collections::BTreeSet<String> {
    let mut products = std::collections::BTreeSet::new();
    let Some(configs) = configurations.and_then(Value::as_array) else {
        return products;
    };
    for config in configs {
        let Some(nodes) = config.get("nodes").and_then(Value::as_array) else {
            continue;
        };
        for node in nodes {
            let Some(matches) = node.get("cpeMatch").and_then(Value::as_array) else {
                continue;
            };
            for cpe in matches {
                if let Some(criteria) = cpe.get("criteria").and_then(Value::as_str) {
                    let parts: Vec<&str> = criteria.split(':').collect();
                    if parts.len() >= 5 && !parts[4].is_empty() && parts[4] != "*" {
                        products.insert(parts[4].to_lowercase());
                    }
                }
            }
        }
    }
    products
}
