//! Append-only log of upgrade attempts.
//!
//! One JSON object per line in `upgrade-helper/history.jsonl`; the latest
//! line for a package wins. Batch runs read it to avoid retrying a target
//! that already failed for a reason a retry cannot fix.
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub pn: String,
    /// Target version of the attempt.
    pub version: String,
    #[serde(default)]
    pub maintainer: Option<String>,
    /// Day of the attempt, UTC.
    pub date: NaiveDate,
    /// Status label of the outcome.
    pub status: String,
    /// Whether the outcome may change after the cool-down.
    pub retryable: bool,
}

impl HistoryEntry {
    pub fn new(
        pn: &str,
        version: &str,
        maintainer: Option<&str>,
        status: &str,
        retryable: bool,
        date: NaiveDate,
    ) -> Self {
        Self {
            pn: pn.to_string(),
            version: version.to_string(),
            maintainer: maintainer.map(str::to_string),
            date,
            status: status.to_string(),
            retryable,
        }
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn append_history(path: &Path, entry: &HistoryEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("create upgrade-helper dir")?;
    }
    let line = serde_json::to_string(entry).context("serialize history entry")?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("append to {}", path.display()))?;
    Ok(())
}

/// Latest entry per package. A missing file is an empty history; lines that
/// do not parse are skipped with a warning.
pub fn load_latest(path: &Path) -> Result<BTreeMap<String, HistoryEntry>> {
    let mut latest = BTreeMap::new();
    if !path.exists() {
        return Ok(latest);
    }
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryEntry>(line) {
            Ok(entry) => {
                latest.insert(entry.pn.clone(), entry);
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %err,
                    "skipping malformed history line"
                );
            }
        }
    }
    Ok(latest)
}

/// A package is attempted unless its last attempt had the same target and
/// either cannot change on retry or is still inside the cool-down.
pub fn should_attempt(
    latest: &BTreeMap<String, HistoryEntry>,
    pn: &str,
    version: &str,
    today: NaiveDate,
    cooldown_days: u32,
) -> bool {
    match latest.get(pn) {
        Some(entry) if entry.version == version => {
            entry.retryable && (today - entry.date).num_days() > i64::from(cooldown_days)
        }
        _ => true,
    }
}
