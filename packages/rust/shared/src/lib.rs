//! Shared types, error model, and configuration for stackwatch.
//!
//! This crate is the foundation depended on by all other stackwatch crates.
//! It provides:
//! - [`StackwatchError`] — the unified error type
//! - Domain types ([`AdvisoryItem`], [`StackDefinition`], [`MatchResult`], [`ScoredAlert`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DepSource, DepSourceKind, DepsConfig, FeedsConfig, HackerNewsConfig, MatchConfig,
    NotifyKind, NotifyTarget, RssSourceConfig, SettingsConfig, StackConfig, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from,
};
pub use error::{Result, StackwatchError};
pub use types::{
    AdvisoryItem, DependencyGraph, EXPLOIT_PHRASES, MatchMode, MatchResult, Priority, Reason,
    ReasonKind, ScoredAlert, Severity, SourceKind, StackDefinition, contains_exploit_phrase,
    normalize_package_name,
};
