//! Append-only download history: one NDJSON record per strategy attempt at
//! `<state>/downloads/history.jsonl`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::persist;

/// One strategy attempt for one resource, appended on every
/// `Running(s) -> *` transition of the cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadAttempt {
    pub resource_url: String,
    pub strategy: String,
    /// Unix seconds.
    pub start: u64,
    pub end: u64,
    /// Bytes durably written during this attempt (delta of `bytes_written`).
    pub bytes: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Appender for the history file.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    /// History under the given state dir: `<state>/downloads/history.jsonl`.
    pub fn new(state_dir: &Path) -> Self {
        HistoryLog {
            path: state_dir.join("downloads").join("history.jsonl"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one attempt record: single line, fsynced.
    pub fn append(&self, attempt: &DownloadAttempt) -> Result<()> {
        let line = serde_json::to_string(attempt)?;
        persist::append_line(&self.path, &line)
    }
}
