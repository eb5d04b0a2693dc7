//! Time-windowed grouping of stabilized files
//!
//! Files under the same parent directory that stabilize within a trailing
//! inactivity window belong to one book. Files sitting directly in the
//! input root share one synthetic key so loose drops still aggregate.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// A directory's worth of stabilized files awaiting emission
#[derive(Debug)]
struct PendingGroup {
    files: BTreeSet<PathBuf>,
    last_activity: Instant,
}

/// An emitted book candidate
#[derive(Debug, Clone, PartialEq)]
pub struct BookGroup {
    /// Common parent directory (the input root for loose files)
    pub dirpath: PathBuf,
    /// Member files, sorted by path
    pub files: Vec<PathBuf>,
}

/// Aggregates stabilized files by parent directory
pub struct Grouper {
    input_root: PathBuf,
    grouping_window: Duration,
    groups: HashMap<PathBuf, PendingGroup>,
}

impl Grouper {
    pub fn new(input_root: PathBuf, grouping_window: Duration) -> Self {
        Self {
            input_root,
            grouping_window,
            groups: HashMap::new(),
        }
    }

    /// Directory key for a file: its parent, or the input root itself when
    /// the file sits directly in the root.
    fn key_for(&self, path: &Path) -> PathBuf {
        match path.parent() {
            Some(parent) if parent != self.input_root => parent.to_path_buf(),
            _ => self.input_root.clone(),
        }
    }

    /// Insert a stabilized file, refreshing its group's inactivity timer
    pub fn add_file(&mut self, path: &Path, now: Instant) {
        let key = self.key_for(path);
        let group = self.groups.entry(key.clone()).or_insert_with(|| PendingGroup {
            files: BTreeSet::new(),
            last_activity: now,
        });
        group.files.insert(path.to_path_buf());
        group.last_activity = now;
        info!(
            file = %path.display(),
            group = %key.display(),
            members = group.files.len(),
            "Added file to group"
        );
    }

    pub fn pending_count(&self) -> usize {
        self.groups.len()
    }

    /// Emit every group whose inactivity window has elapsed. Members that
    /// vanished since stabilization are filtered out; a group left empty by
    /// that filter is dropped without being emitted.
    pub fn check(&mut self, now: Instant) -> Vec<BookGroup> {
        let expired: Vec<PathBuf> = self
            .groups
            .iter()
            .filter(|(_, g)| now.duration_since(g.last_activity) >= self.grouping_window)
            .map(|(k, _)| k.clone())
            .collect();

        let mut emitted = Vec::new();
        for key in expired {
            let group = self.groups.remove(&key).expect("expired key present");
            let files: Vec<PathBuf> = group
                .files
                .into_iter()
                .filter(|f| f.exists())
                .collect();

            if files.is_empty() {
                debug!(group = %key.display(), "Dropping group with no surviving members");
                continue;
            }

            info!(
                group = %key.display(),
                files = files.len(),
                "Group ready"
            );
            emitted.push(BookGroup { dirpath: key, files });
        }
        emitted
    }
}
