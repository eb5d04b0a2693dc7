//! Idempotency ledger for processed source directories
//!
//! A small JSON document keyed by source directory path. Each record
//! carries a content hash of the group's files so an unchanged directory
//! reappearing in the inbox is skipped, while a changed one is retried.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::services::identifier::Identification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    /// Seen and routed to review, not yet organized
    Pending,
    /// Organized into the library
    Processed,
    /// Deliberately skipped (manual intervention, rejection)
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub path: PathBuf,
    pub content_hash: String,
    pub status: LedgerStatus,
    pub files: Vec<PathBuf>,
    pub metadata: Option<Identification>,
    pub updated_at: DateTime<Utc>,
}

/// Hash of a file group's identity: sorted "path:size" lines fed to
/// SHA-256. Order independent, sensitive to membership and file sizes.
pub fn content_hash(files: &[PathBuf]) -> String {
    let mut lines: Vec<String> = files
        .iter()
        .map(|f| {
            let size = fs::metadata(f).map(|m| m.len()).unwrap_or(0);
            format!("{}:{}", f.display(), size)
        })
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

pub struct Ledger {
    path: PathBuf,
    records: Mutex<HashMap<String, LedgerRecord>>,
}

impl Ledger {
    /// Load the ledger from disk, starting empty if the file does not
    /// exist yet. A corrupt file is logged and replaced rather than
    /// blocking startup.
    pub fn load(path: &Path) -> Result<Self> {
        let records = if path.exists() {
            let data = fs::read_to_string(path)
                .with_context(|| format!("Failed to read ledger at {}", path.display()))?;
            match serde_json::from_str::<HashMap<String, LedgerRecord>>(&data) {
                Ok(records) => {
                    info!(path = %path.display(), count = records.len(), "Loaded ledger");
                    records
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ledger file corrupt, starting fresh");
                    HashMap::new()
                }
            }
        } else {
            debug!(path = %path.display(), "No ledger file, starting fresh");
            HashMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            records: Mutex::new(records),
        })
    }

    pub fn get(&self, dirpath: &Path) -> Option<LedgerRecord> {
        self.records
            .lock()
            .get(&dirpath.display().to_string())
            .cloned()
    }

    /// Insert or overwrite the record for a directory and persist.
    pub fn update(
        &self,
        dirpath: &Path,
        hash: &str,
        status: LedgerStatus,
        files: &[PathBuf],
        metadata: Option<Identification>,
    ) -> Result<()> {
        let record = LedgerRecord {
            path: dirpath.to_path_buf(),
            content_hash: hash.to_string(),
            status,
            files: files.to_vec(),
            metadata,
            updated_at: Utc::now(),
        };

        let snapshot = {
            let mut records = self.records.lock();
            records.insert(dirpath.display().to_string(), record);
            records.clone()
        };

        self.persist(&snapshot)
    }

    /// Records awaiting review, used to rebuild the queue on startup.
    pub fn pending_records(&self) -> Vec<LedgerRecord> {
        self.records
            .lock()
            .values()
            .filter(|r| r.status == LedgerStatus::Pending)
            .cloned()
            .collect()
    }

    /// Write the full document to a temp file, then rename into place.
    fn persist(&self, records: &HashMap<String, LedgerRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let data = serde_json::to_string_pretty(records).context("Failed to encode ledger")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)
            .with_context(|| format!("Failed to write ledger to {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move ledger into {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn content_hash_is_order_independent() {
        let tmp = TempDir::new().unwrap();
        let a = touch(tmp.path(), "01.mp3", "aaa");
        let b = touch(tmp.path(), "02.mp3", "bbbb");

        let forward = content_hash(&[a.clone(), b.clone()]);
        let reverse = content_hash(&[b, a]);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn content_hash_changes_when_a_file_grows() {
        let tmp = TempDir::new().unwrap();
        let a = touch(tmp.path(), "01.mp3", "aaa");
        let before = content_hash(std::slice::from_ref(&a));

        fs::write(&a, "aaaaaaaa").unwrap();
        let after = content_hash(std::slice::from_ref(&a));
        assert_ne!(before, after);
    }

    #[test]
    fn update_persists_and_reloads() {
        let tmp = TempDir::new().unwrap();
        let ledger_path = tmp.path().join("ledger.json");
        let book_dir = tmp.path().join("Dune");
        let files = vec![book_dir.join("01.mp3")];

        {
            let ledger = Ledger::load(&ledger_path).unwrap();
            ledger
                .update(&book_dir, "abc123", LedgerStatus::Processed, &files, None)
                .unwrap();
        }

        let reloaded = Ledger::load(&ledger_path).unwrap();
        let record = reloaded.get(&book_dir).unwrap();
        assert_eq!(record.content_hash, "abc123");
        assert_eq!(record.status, LedgerStatus::Processed);
        assert_eq!(record.files, files);
    }

    #[test]
    fn update_overwrites_in_place() {
        let tmp = TempDir::new().unwrap();
        let ledger = Ledger::load(&tmp.path().join("ledger.json")).unwrap();
        let book_dir = tmp.path().join("Dune");

        ledger
            .update(&book_dir, "h1", LedgerStatus::Pending, &[], None)
            .unwrap();
        ledger
            .update(&book_dir, "h2", LedgerStatus::Processed, &[], None)
            .unwrap();

        let record = ledger.get(&book_dir).unwrap();
        assert_eq!(record.content_hash, "h2");
        assert_eq!(record.status, LedgerStatus::Processed);
        assert!(ledger.pending_records().is_empty());
    }

    #[test]
    fn pending_records_filters_by_status() {
        let tmp = TempDir::new().unwrap();
        let ledger = Ledger::load(&tmp.path().join("ledger.json")).unwrap();

        ledger
            .update(&tmp.path().join("A"), "h1", LedgerStatus::Pending, &[], None)
            .unwrap();
        ledger
            .update(&tmp.path().join("B"), "h2", LedgerStatus::Processed, &[], None)
            .unwrap();

        let pending = ledger.pending_records();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].content_hash, "h1");
    }

    #[test]
    fn corrupt_ledger_file_starts_fresh() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.json");
        fs::write(&path, "not json {{{").unwrap();

        let ledger = Ledger::load(&path).unwrap();
        assert!(ledger.pending_records().is_empty());
    }
}
