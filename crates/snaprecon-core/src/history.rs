//! Ledger of applied report updates
//!
//! Each status-and-append run is recorded with the report cutoff before and
//! after the update. If a later run finds the report's cutoff behind the
//! cutoff a previous run produced, the merged output was not written back
//! and appending again would duplicate rows.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// A record of one applied update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the update was applied
    pub timestamp: DateTime<Utc>,
    /// Report the update was computed from
    pub report: PathBuf,
    /// Dump the statuses and new rows came from
    pub dump: PathBuf,
    /// Where the merged table was written
    pub output: PathBuf,
    pub cutoff_before: Option<NaiveDateTime>,
    pub cutoff_after: Option<NaiveDateTime>,
    pub statuses_updated: usize,
    pub rows_appended: usize,
}

/// History file containing all applied updates
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateHistory {
    /// Entries keyed by output (report) path
    pub entries: HashMap<String, Vec<HistoryEntry>>,
}

impl UpdateHistory {
    /// Create a new empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Load history from a file, or create empty if not exists
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(Error::Json)
    }

    /// Save history to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        self.entries
            .entry(key(&entry.output))
            .or_default()
            .push(entry);
    }

    /// Most recent update written to `output`
    pub fn last_for(&self, output: &Path) -> Option<&HistoryEntry> {
        self.entries.get(&key(output)).and_then(|v| v.last())
    }

    /// All entries, oldest first
    pub fn all(&self) -> Vec<&HistoryEntry> {
        let mut all: Vec<&HistoryEntry> = self.entries.values().flatten().collect();
        all.sort_by_key(|e| e.timestamp);
        all
    }

    /// Get total number of entries
    pub fn total_entries(&self) -> usize {
        self.entries.values().map(|v| v.len()).sum()
    }

    /// Describe the re-append hazard for an update of `report` into `output`.
    ///
    /// Returns a message when the last update into `output` came from the
    /// same report path and left a later cutoff than `report` has now.
    pub fn check_reappend_hazard(
        &self,
        report: &Path,
        output: &Path,
        current_cutoff: Option<NaiveDateTime>,
    ) -> Option<String> {
        let last = self.last_for(output)?;
        if key(&last.report) != key(report) || last.rows_appended == 0 {
            return None;
        }

        let stale = match (current_cutoff, last.cutoff_after) {
            (Some(now), Some(after)) => now < after,
            (None, Some(_)) => true,
            _ => false,
        };

        stale.then(|| {
            format!(
                "'{}' still ends at {} but the update of {} appended rows up to {}; \
                 it looks like the merged report was not saved back",
                report.display(),
                current_cutoff.map_or_else(|| "<empty>".to_string(), |c| c.to_string()),
                last.timestamp.format("%Y-%m-%d %H:%M:%S"),
                last.cutoff_after.map_or_else(String::new, |c| c.to_string()),
            )
        })
    }
}

fn key(path: &Path) -> String {
    fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}
