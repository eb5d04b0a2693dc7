//! Inbox filesystem watcher
//!
//! Bridges notify's callback API into a tokio channel. The callback does
//! no work beyond forwarding paths; all debounce and grouping logic lives
//! in the pipeline.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, info};

pub struct InboxWatcher {
    // Held so the underlying watches stay registered
    _watcher: RecommendedWatcher,
}

impl InboxWatcher {
    /// Watch a directory tree recursively. Returns the watcher handle and
    /// a channel of paths touched by create and modify events.
    pub fn new(root: &Path) -> Result<(Self, mpsc::UnboundedReceiver<PathBuf>)> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        for path in event.paths {
                            // Receiver dropping means shutdown, nothing to do
                            let _ = tx.send(path);
                        }
                    }
                }
                Err(e) => error!(error = %e, "Filesystem watch error"),
            })
            .context("Failed to create filesystem watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;

        info!(path = %root.display(), "Watching inbox");
        Ok((Self { _watcher: watcher }, rx))
    }
}
