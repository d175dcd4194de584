//! Persistence tiers for job records.
//!
//! Finished jobs are written to two places, best effort: a JSON record on
//! disk (the durable tier) and the TTL cache (the fast tier). The in-memory
//! registry in the orchestrator is the first tier; this module provides the
//! other two.

pub mod cache;

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Disk tier: one pretty-printed JSON file per finished job.
///
/// Records are named `<sanitized-stem>_<job-id>.json` so a directory listing
/// reads as "what was processed, under which job". Lookup by job id scans for
/// the `_<job-id>.json` suffix since the stem is not known at query time.
#[derive(Debug, Clone)]
pub struct JobDiskStore {
    dir: PathBuf,
}

impl JobDiskStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir).map_err(|e| StoreError::Io { source: e })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Write a job record. Overwrites any previous record for the same
    /// `(stem, job_id)` pair.
    pub fn save<T: Serialize>(&self, stem: &str, job_id: &str, record: &T) -> StoreResult<()> {
        let path = self.record_path(stem, job_id);
        let json = serde_json::to_string_pretty(record).map_err(|e| StoreError::Serialization {
            message: e.to_string(),
        })?;
        fs::write(&path, json).map_err(|e| StoreError::Io { source: e })?;
        tracing::debug!(path = %path.display(), "job record written");
        Ok(())
    }

    /// Load a job record by id, scanning for the `_<job-id>.json` suffix.
    /// Returns `Ok(None)` when no record matches.
    pub fn load<T: DeserializeOwned>(&self, job_id: &str) -> StoreResult<Option<T>> {
        let suffix = format!("_{job_id}.json");
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::Io { source: e })?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io { source: e })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(&suffix) {
                continue;
            }
            let raw = fs::read_to_string(entry.path()).map_err(|e| StoreError::Io { source: e })?;
            let record = serde_json::from_str(&raw).map_err(|e| StoreError::Serialization {
                message: e.to_string(),
            })?;
            return Ok(Some(record));
        }
        Ok(None)
    }

    /// All job ids with a record on disk.
    pub fn list(&self) -> StoreResult<Vec<String>> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::Io { source: e })?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io { source: e })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else { continue };
            if let Some(pos) = stem.rfind('_') {
                ids.push(stem[pos + 1..].to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn record_path(&self, stem: &str, job_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{job_id}.json", sanitize_filename(stem)))
    }
}

/// Reduce a document stem to a safe filename fragment: alphanumerics, dashes,
/// and underscores survive; everything else becomes an underscore. Empty
/// input maps to `"job"`.
pub fn sanitize_filename(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "job".to_string()
    } else {
        cleaned
    }
}
