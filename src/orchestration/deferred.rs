//! Persistent deferred-retry counters.
//!
//! A task that fails with a retryable error is deferred rather than given
//! up on; the count of deferrals must survive orchestrator restarts so a
//! crash mid-backlog doesn't reset a task's retry budget. Records live in a
//! JSON file under `~/.drover/`, keyed by source type, scope (e.g. the PRD
//! file path) and task id.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::core::TaskId;
use crate::{dlog_debug, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredRecord {
    pub count: u32,
    pub updated_at: DateTime<Utc>,
}

/// Tracker for per-task deferral counts.
pub struct DeferredTaskTracker {
    path: PathBuf,
    records: HashMap<String, DeferredRecord>,
}

impl DeferredTaskTracker {
    /// Open the tracker backed by the default state file.
    pub fn open_default() -> Result<Self> {
        Self::open(Config::deferred_path()?)
    }

    /// Open a tracker backed by an explicit file, loading existing records.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            HashMap::new()
        };
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn key(source_type: &str, scope: &str, id: &TaskId) -> String {
        format!("{}:{}:{}", source_type, scope, id)
    }

    /// Current deferral count for a task.
    pub fn count(&self, source_type: &str, scope: &str, id: &TaskId) -> u32 {
        self.records
            .get(&Self::key(source_type, scope, id))
            .map(|r| r.count)
            .unwrap_or(0)
    }

    /// Record one retryable failure; returns the new count. Persisted
    /// immediately so a process death doesn't lose the deferral.
    pub fn record_failure(&mut self, source_type: &str, scope: &str, id: &TaskId) -> Result<u32> {
        let key = Self::key(source_type, scope, id);
        let record = self.records.entry(key.clone()).or_insert(DeferredRecord {
            count: 0,
            updated_at: Utc::now(),
        });
        record.count += 1;
        record.updated_at = Utc::now();
        let count = record.count;
        dlog_debug!("Deferred {}: count now {}", key, count);
        self.save()?;
        Ok(count)
    }

    /// Drop a task's record (on success or on exceeding the retry budget).
    pub fn clear(&mut self, source_type: &str, scope: &str, id: &TaskId) -> Result<()> {
        if self
            .records
            .remove(&Self::key(source_type, scope, id))
            .is_some()
        {
            self.save()?;
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.records)?)?;
        Ok(())
    }
}
