//! File stability tracking
//!
//! Writers (copy tools, torrent clients) mutate size and mtime while a file
//! is still being written. Each tracked file must hold a constant
//! (size, mtime) pair for the full stability window before it is handed to
//! the next stage; any observed change resets the debounce.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use tracing::{debug, info, warn};

/// Per-file sample state
#[derive(Debug, Clone)]
struct TrackedFile {
    size: u64,
    mtime: Option<SystemTime>,
    stable_since: Option<Instant>,
}

/// Size/mtime debounce state machine over a set of watched paths
pub struct StabilityTracker {
    stability_window: std::time::Duration,
    tracked: HashMap<PathBuf, TrackedFile>,
}

impl StabilityTracker {
    pub fn new(stability_window: std::time::Duration) -> Self {
        Self {
            stability_window,
            tracked: HashMap::new(),
        }
    }

    /// Begin tracking a newly observed path. No-op if already tracked.
    ///
    /// Extension filtering happens in the caller: the tracker itself accepts
    /// whatever it is given so the pipeline decides what counts as media.
    pub fn track(&mut self, path: &Path) {
        if self.tracked.contains_key(path) {
            return;
        }

        info!(path = %path.display(), "Tracking file for stability");
        self.tracked.insert(
            path.to_path_buf(),
            TrackedFile {
                // Sentinel sample so the first real stat always registers
                // as a change and starts the debounce fresh.
                size: u64::MAX,
                mtime: None,
                stable_since: None,
            },
        );
    }

    /// A modification event arrived for a path; make sure it is tracked.
    /// The next `check` pass picks up the changed stat and resets the timer.
    pub fn touch(&mut self, path: &Path) {
        if !self.tracked.contains_key(path) {
            self.track(path);
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// One scheduling tick: stat every tracked file and return the paths
    /// that have crossed the stability window. Returned paths leave the
    /// tracker (consumed). Vanished paths are discarded.
    pub fn check(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut stable = Vec::new();
        let mut gone = Vec::new();

        for (path, entry) in self.tracked.iter_mut() {
            let meta = match std::fs::metadata(path) {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "Tracked file disappeared");
                    gone.push(path.clone());
                    continue;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to stat tracked file");
                    continue;
                }
            };

            let size = meta.len();
            let mtime = meta.modified().ok();

            if size == entry.size && mtime == entry.mtime {
                match entry.stable_since {
                    None => entry.stable_since = Some(now),
                    Some(since) if now.duration_since(since) >= self.stability_window => {
                        stable.push(path.clone());
                    }
                    Some(_) => {}
                }
            } else {
                // Still being written; restart the debounce
                entry.size = size;
                entry.mtime = mtime;
                entry.stable_since = None;
            }
        }

        for path in gone {
            self.tracked.remove(&path);
        }
        for path in &stable {
            self.tracked.remove(path);
            info!(path = %path.display(), "File stable");
        }

        debug!(
            tracked = self.tracked.len(),
            stable = stable.len(),
            "Stability check complete"
        );
        stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn unchanged_file_becomes_stable_after_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "book.mp3", b"audio");

        let mut tracker = StabilityTracker::new(Duration::from_secs(10));
        tracker.track(&path);

        let t0 = Instant::now();
        // First check records the sample; second starts the quiet period.
        assert!(tracker.check(t0).is_empty());
        assert!(tracker.check(t0 + Duration::from_secs(1)).is_empty());
        // Not yet past the window.
        assert!(tracker.check(t0 + Duration::from_secs(5)).is_empty());
        // Past the window, measured from when the quiet period started.
        let stable = tracker.check(t0 + Duration::from_secs(12));
        assert_eq!(stable, vec![path]);
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[test]
    fn change_resets_the_debounce() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "book.mp3", b"aud");

        let mut tracker = StabilityTracker::new(Duration::from_secs(10));
        tracker.track(&path);

        let t0 = Instant::now();
        assert!(tracker.check(t0).is_empty());
        assert!(tracker.check(t0 + Duration::from_secs(1)).is_empty());

        // The writer appends more data mid-window.
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"io-more")
            .unwrap();

        // Change observed: sample updated, timer cleared.
        assert!(tracker.check(t0 + Duration::from_secs(5)).is_empty());
        // Quiet period restarts here...
        assert!(tracker.check(t0 + Duration::from_secs(6)).is_empty());
        // ...so the original deadline no longer applies.
        assert!(tracker.check(t0 + Duration::from_secs(12)).is_empty());
        // Stable only once the new quiet period has run its course.
        let stable = tracker.check(t0 + Duration::from_secs(17));
        assert_eq!(stable, vec![path]);
    }

    #[test]
    fn vanished_file_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "book.mp3", b"audio");

        let mut tracker = StabilityTracker::new(Duration::from_secs(1));
        tracker.track(&path);
        assert!(tracker.check(Instant::now()).is_empty());

        std::fs::remove_file(&path).unwrap();
        assert!(tracker
            .check(Instant::now() + Duration::from_secs(5))
            .is_empty());
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[test]
    fn track_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "book.mp3", b"audio");

        let mut tracker = StabilityTracker::new(Duration::from_secs(10));
        tracker.track(&path);
        let t0 = Instant::now();
        assert!(tracker.check(t0).is_empty());
        assert!(tracker.check(t0 + Duration::from_secs(1)).is_empty());

        // Re-announcing the same path must not reset the running debounce.
        tracker.track(&path);
        let stable = tracker.check(t0 + Duration::from_secs(12));
        assert_eq!(stable, vec![path]);
    }
}
