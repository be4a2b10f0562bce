//! Plan input: NDJSON records produced upstream by the catalog/inventory
//! diff, one download target per line.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Why the planner scheduled this resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReason {
    Missing,
    EtagChanged,
    SizeChanged,
}

/// One download target. Immutable input to the cascade manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    pub dataset_slug: String,
    pub resource_url: String,
    /// Absolute destination path.
    pub dest_path: PathBuf,
    pub reason: PlanReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_etag: Option<String>,
}

/// Read a plan file: one JSON record per line, blank lines ignored.
pub fn read_plan(path: &Path) -> Result<Vec<PlanItem>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read plan: {}", path.display()))?;
    let mut items = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let item: PlanItem = serde_json::from_str(line)
            .with_context(|| format!("parse plan line {} in {}", idx + 1, path.display()))?;
        items.push(item);
    }
    Ok(items)
}
