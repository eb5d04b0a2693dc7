//! In-memory review queue for medium-confidence matches
//!
//! Items are keyed by a short hash of the source directory path so a
//! directory re-entering the queue refreshes its existing entry instead
//! of duplicating it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::services::identifier::Identification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Awaiting operator review
    Pending,
    /// An organize run is in flight
    Processing,
    /// Operator approved, organize scheduled
    Approved,
    /// Operator rejected, routed to manual intervention
    Rejected,
    /// Last organize attempt failed, item retained for retry
    Error,
    /// Organized successfully
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub dirpath: PathBuf,
    pub files: Vec<PathBuf>,
    pub metadata: Identification,
    pub status: QueueStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stable short identifier for a source directory
pub fn queue_id(dirpath: &Path) -> String {
    let digest = Sha256::digest(dirpath.display().to_string().as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

#[derive(Default)]
pub struct ReviewQueue {
    items: Mutex<HashMap<String, QueueItem>>,
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group to the queue, or refresh the files and metadata of an
    /// existing entry for the same directory. Returns the item id.
    pub fn add(&self, dirpath: &Path, files: Vec<PathBuf>, metadata: Identification) -> String {
        let id = queue_id(dirpath);
        let now = Utc::now();

        let mut items = self.items.lock();
        match items.get_mut(&id) {
            Some(existing) => {
                debug!(id = %id, path = %dirpath.display(), "Refreshing queue item");
                existing.files = files;
                existing.metadata = metadata;
                existing.status = QueueStatus::Pending;
                existing.error = None;
                existing.updated_at = now;
            }
            None => {
                info!(id = %id, path = %dirpath.display(), "Queued group for review");
                items.insert(
                    id.clone(),
                    QueueItem {
                        id: id.clone(),
                        dirpath: dirpath.to_path_buf(),
                        files,
                        metadata,
                        status: QueueStatus::Pending,
                        error: None,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        id
    }

    pub fn get(&self, id: &str) -> Option<QueueItem> {
        self.items.lock().get(id).cloned()
    }

    /// All items, newest first
    pub fn list(&self) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self.items.lock().values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }

    pub fn update_status(&self, id: &str, status: QueueStatus, error: Option<String>) -> bool {
        let mut items = self.items.lock();
        match items.get_mut(id) {
            Some(item) => {
                item.status = status;
                item.error = error;
                item.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn set_metadata(&self, id: &str, metadata: Identification) -> bool {
        let mut items = self.items.lock();
        match items.get_mut(id) {
            Some(item) => {
                item.metadata = metadata;
                item.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<QueueItem> {
        self.items.lock().remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn metadata(title: &str) -> Identification {
        let mut id = Identification::default();
        id.title = Some(title.to_string());
        id
    }

    #[test]
    fn queue_id_is_stable_and_short() {
        let path = Path::new("/data/input/dune");
        assert_eq!(queue_id(path), queue_id(path));
        assert_eq!(queue_id(path).len(), 16);
        assert_ne!(queue_id(path), queue_id(Path::new("/data/input/other")));
    }

    #[test]
    fn re_adding_a_directory_refreshes_instead_of_duplicating() {
        let queue = ReviewQueue::new();
        let dir = Path::new("/data/input/dune");

        let id1 = queue.add(dir, vec![PathBuf::from("a.mp3")], metadata("Dune"));
        queue.update_status(&id1, QueueStatus::Error, Some("boom".to_string()));

        let id2 = queue.add(dir, vec![PathBuf::from("b.mp3")], metadata("Dune 2"));
        assert_eq!(id1, id2);
        assert_eq!(queue.list().len(), 1);

        let item = queue.get(&id1).unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.error, None);
        assert_eq!(item.metadata.title.as_deref(), Some("Dune 2"));
        assert_eq!(item.files, vec![PathBuf::from("b.mp3")]);
    }

    #[test]
    fn update_status_on_missing_item_returns_false() {
        let queue = ReviewQueue::new();
        assert!(!queue.update_status("nope", QueueStatus::Completed, None));
    }

    #[test]
    fn set_metadata_replaces_the_identification() {
        let queue = ReviewQueue::new();
        let id = queue.add(Path::new("/data/input/x"), vec![], metadata("Old"));

        assert!(queue.set_metadata(&id, metadata("New")));
        assert_eq!(
            queue.get(&id).unwrap().metadata.title.as_deref(),
            Some("New")
        );
    }

    #[test]
    fn remove_returns_the_item() {
        let queue = ReviewQueue::new();
        let id = queue.add(Path::new("/data/input/x"), vec![], metadata("X"));

        let removed = queue.remove(&id).unwrap();
        assert_eq!(removed.id, id);
        assert!(queue.get(&id).is_none());
    }
}
