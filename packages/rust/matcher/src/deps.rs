//! Dependency-graph loading from package manifests and lockfiles.
//!
//! Manifests (package.json, requirements.txt) contribute direct
//! dependencies; lockfiles (package-lock.json, poetry.lock) contribute
//! transitive ones. A missing or unreadable source narrows matching signal
//! but never fails the run.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, warn};

use stackwatch_shared::{DepSource, DepSourceKind, DependencyGraph, DepsConfig};

pub use stackwatch_shared::normalize_package_name;

/// Build the dependency graph from the configured sources, resolved
/// relative to `base_dir` (the config file's directory).
pub fn load_dependency_graph(config: &DepsConfig, base_dir: &Path) -> DependencyGraph {
    let mut graph = DependencyGraph::default();
    if !config.enabled {
        return graph;
    }

    let allowed: BTreeSet<String> = config
        .ecosystems
        .iter()
        .map(|e| e.to_lowercase())
        .collect();

    for source in &config.sources {
        let path = base_dir.join(&source.path);
        if !path.exists() {
            debug!(path = %path.display(), "dependency source not found, skipping");
            continue;
        }
        let outcome = match source.kind {
            DepSourceKind::Manifest => load_manifest(&path, &allowed, &mut graph),
            DepSourceKind::Lockfile => {
                if config.include_transitive {
                    load_lockfile(&path, &allowed, &mut graph)
                } else {
                    Ok(())
                }
            }
        };
        if let Err(message) = outcome {
            warn!(path = %path.display(), %message, "failed to read dependency source");
        }
    }

    graph
}

fn ecosystem_allowed(allowed: &BTreeSet<String>, ecosystem: &str) -> bool {
    allowed.is_empty() || allowed.contains(ecosystem)
}

fn load_manifest(
    path: &Path,
    allowed: &BTreeSet<String>,
    graph: &mut DependencyGraph,
) -> Result<(), String> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if file_name == "package.json" {
        load_package_json(path, allowed, graph)
    } else if file_name.ends_with(".txt") {
        load_requirements(path, allowed, graph)
    } else {
        Err(format!("unsupported manifest '{file_name}'"))
    }
}

fn load_lockfile(
    path: &Path,
    allowed: &BTreeSet<String>,
    graph: &mut DependencyGraph,
) -> Result<(), String> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if file_name == "package-lock.json" {
        load_package_lock(path, allowed, graph)
    } else if file_name == "poetry.lock" {
        load_poetry_lock(path, allowed, graph)
    } else {
        Err(format!("unsupported lockfile '{file_name}'"))
    }
}

// ---------------------------------------------------------------------------
// npm
// ---------------------------------------------------------------------------

fn load_package_json(
    path: &Path,
    allowed: &BTreeSet<String>,
    graph: &mut DependencyGraph,
) -> Result<(), String> {
    if !ecosystem_allowed(allowed, "npm") {
        return Ok(());
    }
    let data: serde_json::Value = read_json(path)?;
    let mut names: BTreeSet<String> = BTreeSet::new();
    for key in ["dependencies", "devDependencies"] {
        if let Some(map) = data.get(key).and_then(|v| v.as_object()) {
            names.extend(map.keys().map(|n| normalize_package_name(n, "npm")));
        }
    }
    graph.add_direct("npm", names);
    Ok(())
}

fn load_package_lock(
    path: &Path,
    allowed: &BTreeSet<String>,
    graph: &mut DependencyGraph,
) -> Result<(), String> {
    if !ecosystem_allowed(allowed, "npm") {
        return Ok(());
    }
    let data: serde_json::Value = read_json(path)?;
    let mut names: BTreeSet<String> = BTreeSet::new();

    // Lockfile v2/v3: "packages" keyed by install path.
    if let Some(map) = data.get("packages").and_then(|v| v.as_object()) {
        for key in map.keys() {
            if key.is_empty() {
                continue; // the root project entry
            }
            let name = match key.rsplit_once("node_modules/") {
                Some((_, name)) => name,
                None => key.as_str(),
            };
            names.insert(normalize_package_name(name, "npm"));
        }
    } else if let Some(map) = data.get("dependencies").and_then(|v| v.as_object()) {
        // Lockfile v1: nested "dependencies" tree.
        collect_npm_tree(map, &mut names);
    }

    graph.add_transitive("npm", names);
    Ok(())
}

fn collect_npm_tree(map: &serde_json::Map<String, serde_json::Value>, names: &mut BTreeSet<String>) {
    for (name, value) in map {
        names.insert(normalize_package_name(name, "npm"));
        if let Some(nested) = value.get("dependencies").and_then(|v| v.as_object()) {
            collect_npm_tree(nested, names);
        }
    }
}

// ---------------------------------------------------------------------------
// pip
// ---------------------------------------------------------------------------

fn load_requirements(
    path: &Path,
    allowed: &BTreeSet<String>,
    graph: &mut DependencyGraph,
) -> Result<(), String> {
    if !ecosystem_allowed(allowed, "pip") {
        return Ok(());
    }
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let splitter = regex::Regex::new(r"[<>=!~]").expect("static regex");

    let mut names: BTreeSet<String> = BTreeSet::new();
    for line in content.lines() {
        let cleaned = line.trim();
        if cleaned.is_empty() || cleaned.starts_with('#') || cleaned.starts_with('-') {
            continue;
        }
        let name = splitter.split(cleaned).next().unwrap_or_default();
        let name = name.split('[').next().unwrap_or_default().trim();
        if !name.is_empty() {
            names.insert(normalize_package_name(name, "pip"));
        }
    }
    graph.add_direct("pip", names);
    Ok(())
}

fn load_poetry_lock(
    path: &Path,
    allowed: &BTreeSet<String>,
    graph: &mut DependencyGraph,
) -> Result<(), String> {
    if !ecosystem_allowed(allowed, "pip") {
        return Ok(());
    }
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;

    let mut names: BTreeSet<String> = BTreeSet::new();
    let mut in_package = false;
    for line in content.lines() {
        let cleaned = line.trim();
        if cleaned == "[[package]]" {
            in_package = true;
            continue;
        }
        if cleaned.starts_with("[[") || (cleaned.starts_with('[') && cleaned != "[[package]]") {
            in_package = false;
            continue;
        }
        if in_package {
            if let Some(value) = cleaned.strip_prefix("name =") {
                let name = value.trim().trim_matches('"');
                if !name.is_empty() {
                    names.insert(normalize_package_name(name, "pip"));
                }
            }
        }
    }
    graph.add_transitive("pip", names);
    Ok(())
}

fn read_json(path: &Path) -> Result<serde_json::Value, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&content).map_err(|e| e.to_string())
}
