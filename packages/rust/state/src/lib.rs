//! Durable dedup state for stackwatch.
//!
//! The [`DedupStore`] owns the on-disk JSON representation of which advisory
//! ids were already delivered; the orchestrator owns the in-memory
//! [`DedupRecord`] for the duration of a cycle and is its only writer.
//!
//! **Persistence rules:**
//! - A missing file yields a fresh empty record, never an error.
//! - A present-but-unparsable file is [`StackwatchError::CorruptState`] —
//!   the operator decides whether to abort or reinitialize.
//! - Saves go through a temp file + rename so a crash mid-save can never
//!   leave a file that a later load parses as valid-but-wrong.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use stackwatch_shared::{Result, StackwatchError};

/// Current schema version for the state file.
pub const STATE_VERSION: u32 = 1;

/// Default retention window for sent-item entries.
pub const RETENTION_DAYS: i64 = 30;

// ---------------------------------------------------------------------------
// DedupRecord
// ---------------------------------------------------------------------------

/// The persisted dedup record: item id → first-seen time, plus the last
/// completed poll time.
#[derive(Debug, Clone, Serialize)]
pub struct DedupRecord {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll: Option<DateTime<Utc>>,
    pub sent_items: BTreeMap<String, DateTime<Utc>>,
}

impl Default for DedupRecord {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            last_poll: None,
            sent_items: BTreeMap::new(),
        }
    }
}

impl DedupRecord {
    /// Whether an item id was already delivered. An id present here is never
    /// notified again.
    pub fn was_sent(&self, id: &str) -> bool {
        self.sent_items.contains_key(id)
    }

    /// Record an item as delivered. Idempotent: marking an already-sent id
    /// keeps its original first-seen time.
    pub fn mark_sent(&mut self, id: &str, now: DateTime<Utc>) {
        self.sent_items.entry(id.to_string()).or_insert(now);
    }

    /// Drop entries whose first-seen time is older than the retention
    /// window. Runs once per cycle, after all notifications are attempted.
    pub fn prune(&mut self, now: DateTime<Utc>, retention_days: i64) {
        let cutoff = now - Duration::days(retention_days);
        let before = self.sent_items.len();
        self.sent_items.retain(|_, first_seen| *first_seen >= cutoff);
        let removed = before - self.sent_items.len();
        if removed > 0 {
            debug!(removed, retained = self.sent_items.len(), "pruned sent items");
        }
    }
}

// ---------------------------------------------------------------------------
// On-disk shapes
// ---------------------------------------------------------------------------

/// Wire shape of the state file. `sent_items` round-trips both the extended
/// id → first-seen map and the legacy bare id list (which loads with the
/// current time as first-seen).
#[derive(Debug, Deserialize)]
struct DedupRecordWire {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    last_poll: Option<DateTime<Utc>>,
    #[serde(default)]
    sent_items: SentItemsWire,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SentItemsWire {
    Timestamped(BTreeMap<String, DateTime<Utc>>),
    Bare(Vec<String>),
}

impl Default for SentItemsWire {
    fn default() -> Self {
        Self::Timestamped(BTreeMap::new())
    }
}

impl DedupRecordWire {
    fn into_record(self, now: DateTime<Utc>) -> DedupRecord {
        let sent_items = match self.sent_items {
            SentItemsWire::Timestamped(map) => map,
            SentItemsWire::Bare(ids) => ids.into_iter().map(|id| (id, now)).collect(),
        };
        DedupRecord {
            version: self.version.unwrap_or(STATE_VERSION),
            last_poll: self.last_poll,
            sent_items,
        }
    }
}

// ---------------------------------------------------------------------------
// DedupStore
// ---------------------------------------------------------------------------

/// Handle on the state file location; performs atomic load/save.
#[derive(Debug, Clone)]
pub struct DedupStore {
    path: PathBuf,
}

impl DedupStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, or a fresh empty one if the file does not exist.
    pub fn load(&self) -> Result<DedupRecord> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no state file, starting fresh");
            return Ok(DedupRecord::default());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| StackwatchError::io(&self.path, e))?;

        let wire: DedupRecordWire =
            serde_json::from_str(&content).map_err(|e| StackwatchError::CorruptState {
                path: self.path.clone(),
                message: e.to_string(),
            })?;

        Ok(wire.into_record(Utc::now()))
    }

    /// Persist the record atomically: write a sibling temp file, then rename
    /// over the target.
    pub fn save(&self, record: &DedupRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StackwatchError::io(parent, e))?;
            }
        }

        let payload = serde_json::to_string_pretty(record)
            .map_err(|e| StackwatchError::config(format!("state serialization: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, payload).map_err(|e| StackwatchError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StackwatchError::io(&self.path, e))?;

        debug!(
            path = %self.path.display(),
            entries = record.sent_items.len(),
            "state saved"
        );
        Ok(())
    }
}
