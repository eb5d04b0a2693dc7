//! Ingestion pipeline orchestrator
//!
//! Ties the stages together: watcher events feed the stability tracker,
//! stable files feed the grouper, emitted groups are identified, enriched
//! and routed by confidence. Group processing runs on a bounded worker
//! pool with per-directory exclusivity so the same book is never
//! organized twice concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::services::identifier::Identifier;
use crate::services::ledger::{content_hash, Ledger, LedgerStatus};
use crate::services::queue::{queue_id, QueueItem, QueueStatus, ReviewQueue};
use crate::services::{
    Aggregator, BookGroup, Extractor, Grouper, Organizer, RescanNotifier, StabilityTracker,
    TransferMode,
};

/// Scheduling tick for stability and grouping checks
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Filenames and directory components that never belong to a book
const JUNK_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", "__MACOSX"];

pub struct Pipeline {
    config: Arc<Config>,
    identifier: Identifier,
    aggregator: Aggregator,
    organizer: Organizer,
    extractor: Extractor,
    ledger: Ledger,
    queue: ReviewQueue,
    rescan: RescanNotifier,
    workers: Semaphore,
    dir_locks: parking_lot::Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl Pipeline {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let ledger = Ledger::load(&config.ledger_path)?;
        Ok(Self {
            identifier: Identifier::new(),
            aggregator: Aggregator::from_config(&config),
            organizer: Organizer::new(&config),
            extractor: Extractor::new(config.dry_run),
            ledger,
            queue: ReviewQueue::new(),
            rescan: RescanNotifier::new(&config),
            workers: Semaphore::new(config.worker_pool_size.max(1)),
            dir_locks: parking_lot::Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn queue(&self) -> &ReviewQueue {
        &self.queue
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn organizer(&self) -> &Organizer {
        &self.organizer
    }

    /// Rebuild the review queue from ledger records that were awaiting
    /// review when the previous process stopped.
    pub fn restore_queue(&self) {
        let pending = self.ledger.pending_records();
        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), "Restoring pending groups into the review queue");
        for record in pending {
            self.queue.add(
                &record.path,
                record.files,
                record.metadata.unwrap_or_default(),
            );
        }
    }

    /// Main loop. Consumes watcher events until the channel closes or
    /// shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<PathBuf>) {
        let mut tracker = StabilityTracker::new(self.config.stability_window);
        let mut grouper = Grouper::new(self.config.input_dir.clone(), self.config.grouping_window);

        self.initial_scan(&mut tracker);

        // Extraction tasks feed discovered files back into the tracker
        let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut tick = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let now = Instant::now();
                    for path in tracker.check(now) {
                        if Extractor::is_archive(&path) {
                            self.spawn_extraction(path, feedback_tx.clone());
                        } else {
                            grouper.add_file(&path, now);
                        }
                    }
                    for group in grouper.check(now) {
                        let pipeline = Arc::clone(&self);
                        tokio::spawn(async move {
                            pipeline.process_group(group).await;
                        });
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(path) if self.admits(&path) => tracker.touch(&path),
                        Some(path) => debug!(path = %path.display(), "Ignoring event"),
                        None => {
                            info!("Watcher channel closed, stopping pipeline");
                            break;
                        }
                    }
                }
                Some(path) = feedback_rx.recv() => {
                    if self.admits(&path) {
                        tracker.touch(&path);
                    }
                }
            }
        }
    }

    /// Whether a path belongs in the pipeline at all
    fn admits(&self, path: &Path) -> bool {
        let junk = path.components().any(|c| {
            c.as_os_str()
                .to_str()
                .map(|s| JUNK_NAMES.contains(&s) || s.starts_with("._"))
                .unwrap_or(false)
        });
        if junk {
            return false;
        }
        self.config.is_allowed_extension(path) || Extractor::is_archive(path)
    }

    /// Pick up files that arrived while the process was down
    fn initial_scan(&self, tracker: &mut StabilityTracker) {
        let mut found = 0usize;
        for entry in WalkDir::new(&self.config.input_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if self.admits(entry.path()) {
                tracker.track(entry.path());
                found += 1;
            }
        }
        info!(count = found, path = %self.config.input_dir.display(), "Initial inbox scan complete");
    }

    fn spawn_extraction(self: &Arc<Self>, archive: PathBuf, feedback: mpsc::UnboundedSender<PathBuf>) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            match pipeline.extractor.extract(&archive).await {
                Ok(dest) => {
                    for entry in WalkDir::new(&dest)
                        .into_iter()
                        .filter_map(|e| e.ok())
                        .filter(|e| e.file_type().is_file())
                    {
                        let _ = feedback.send(entry.path().to_path_buf());
                    }
                }
                Err(e) => {
                    error!(path = %archive.display(), error = %e, "Archive extraction failed")
                }
            }
        });
    }

    fn transfer_mode(&self) -> TransferMode {
        if self.config.keep_source {
            TransferMode::Copy
        } else {
            TransferMode::Move
        }
    }

    fn dir_lock(&self, dirpath: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.dir_locks.lock();
        Arc::clone(
            locks
                .entry(dirpath.to_path_buf())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Drop the lock entry for a directory once no task holds it.
    fn release_dir_lock(&self, dirpath: &Path) {
        let mut locks = self.dir_locks.lock();
        if let Some(lock) = locks.get(dirpath) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(dirpath);
            }
        }
    }

    /// Full treatment of one emitted group: idempotency check, identify,
    /// enrich, route by confidence.
    pub async fn process_group(&self, group: BookGroup) {
        let Ok(_permit) = self.workers.acquire().await else {
            return;
        };
        {
            let lock = self.dir_lock(&group.dirpath);
            let _guard = lock.lock().await;

            if let Err(e) = self.process_group_inner(&group).await {
                error!(path = %group.dirpath.display(), error = %e, "Failed to process group");
            }
        }
        self.release_dir_lock(&group.dirpath);
    }

    async fn process_group_inner(&self, group: &BookGroup) -> Result<()> {
        let files: Vec<PathBuf> = group.files.iter().filter(|f| f.exists()).cloned().collect();
        if files.is_empty() {
            debug!(path = %group.dirpath.display(), "Group is empty, nothing to do");
            return Ok(());
        }

        let hash = content_hash(&files);
        if let Some(record) = self.ledger.get(&group.dirpath) {
            // A pending record with the same hash is already sitting in
            // the review queue; reprocessing would clobber operator edits.
            let settled = matches!(
                record.status,
                LedgerStatus::Pending | LedgerStatus::Processed
            );
            if record.content_hash == hash && settled {
                info!(
                    path = %group.dirpath.display(),
                    status = ?record.status,
                    "Group unchanged since last run, skipping"
                );
                return Ok(());
            }
        }

        let seed = self.identifier.identify(&group.dirpath, &files);
        let enriched = self.aggregator.enrich(seed).await;
        let confidence = enriched.confidence;

        if confidence >= self.config.match_threshold_automatic {
            info!(
                path = %group.dirpath.display(),
                confidence,
                "High confidence match, organizing automatically"
            );
            match self
                .organizer
                .organize(&group.dirpath, &files, &enriched, self.transfer_mode())
                .await
            {
                Ok(dest) => {
                    self.ledger.update(
                        &group.dirpath,
                        &hash,
                        LedgerStatus::Processed,
                        &files,
                        Some(enriched),
                    )?;
                    self.queue.remove(&queue_id(&group.dirpath));
                    info!(dest = %dest.display(), "Book organized");
                    self.rescan.notify().await;
                }
                Err(e) => {
                    warn!(path = %group.dirpath.display(), error = %e, "Organize failed, queueing for review");
                    let id = self.queue.add(&group.dirpath, files.clone(), enriched.clone());
                    self.queue
                        .update_status(&id, QueueStatus::Error, Some(e.to_string()));
                    self.ledger.update(
                        &group.dirpath,
                        &hash,
                        LedgerStatus::Pending,
                        &files,
                        Some(enriched),
                    )?;
                }
            }
        } else if confidence >= self.config.match_threshold_probable {
            info!(
                path = %group.dirpath.display(),
                confidence,
                "Probable match, queueing for review"
            );
            self.queue.add(&group.dirpath, files.clone(), enriched.clone());
            self.ledger.update(
                &group.dirpath,
                &hash,
                LedgerStatus::Pending,
                &files,
                Some(enriched),
            )?;
        } else {
            info!(
                path = %group.dirpath.display(),
                confidence,
                "No usable match, moving to manual intervention"
            );
            match self
                .organizer
                .move_to_manual(&group.dirpath, &files, &enriched)
            {
                Ok(_) => {
                    self.ledger.update(
                        &group.dirpath,
                        &hash,
                        LedgerStatus::Ignored,
                        &files,
                        Some(enriched),
                    )?;
                }
                Err(e) => {
                    warn!(path = %group.dirpath.display(), error = %e, "Manual intervention move failed");
                    let id = self.queue.add(&group.dirpath, files.clone(), enriched.clone());
                    self.queue
                        .update_status(&id, QueueStatus::Error, Some(e.to_string()));
                    self.ledger.update(
                        &group.dirpath,
                        &hash,
                        LedgerStatus::Pending,
                        &files,
                        Some(enriched),
                    )?;
                }
            }
        }

        Ok(())
    }

    /// Operator approved a queue item: organize with its current metadata.
    pub async fn organize_item(&self, item: QueueItem) -> Result<PathBuf> {
        let result = self.organize_item_locked(&item).await;
        self.release_dir_lock(&item.dirpath);
        result
    }

    async fn organize_item_locked(&self, item: &QueueItem) -> Result<PathBuf> {
        let lock = self.dir_lock(&item.dirpath);
        let _guard = lock.lock().await;

        self.queue
            .update_status(&item.id, QueueStatus::Processing, None);
        let hash = content_hash(&item.files);

        match self
            .organizer
            .organize(&item.dirpath, &item.files, &item.metadata, self.transfer_mode())
            .await
        {
            Ok(dest) => {
                self.ledger.update(
                    &item.dirpath,
                    &hash,
                    LedgerStatus::Processed,
                    &item.files,
                    Some(item.metadata.clone()),
                )?;
                self.queue
                    .update_status(&item.id, QueueStatus::Completed, None);
                self.queue.remove(&item.id);
                self.rescan.notify().await;
                Ok(dest)
            }
            Err(e) => {
                self.queue
                    .update_status(&item.id, QueueStatus::Error, Some(e.to_string()));
                if let Err(ledger_err) = self.ledger.update(
                    &item.dirpath,
                    &hash,
                    LedgerStatus::Pending,
                    &item.files,
                    Some(item.metadata.clone()),
                ) {
                    warn!(error = %ledger_err, "Failed to record pending state");
                }
                Err(e)
            }
        }
    }

    /// Operator rejected a queue item: park it for manual handling.
    pub async fn reject_item(&self, item: QueueItem) -> Result<PathBuf> {
        let result = self.reject_item_locked(&item).await;
        self.release_dir_lock(&item.dirpath);
        result
    }

    async fn reject_item_locked(&self, item: &QueueItem) -> Result<PathBuf> {
        let lock = self.dir_lock(&item.dirpath);
        let _guard = lock.lock().await;

        let hash = content_hash(&item.files);
        let dest = self
            .organizer
            .move_to_manual(&item.dirpath, &item.files, &item.metadata)?;
        self.ledger.update(
            &item.dirpath,
            &hash,
            LedgerStatus::Ignored,
            &item.files,
            Some(item.metadata.clone()),
        )?;
        self.queue
            .update_status(&item.id, QueueStatus::Rejected, None);
        self.queue.remove(&item.id);
        Ok(dest)
    }

    /// Apply an operator's metadata correction to a queue item, mirrored
    /// into the ledger so the edit survives a restart.
    pub fn update_item_metadata(
        &self,
        item: &QueueItem,
        metadata: crate::services::Identification,
    ) -> Result<()> {
        self.queue.set_metadata(&item.id, metadata.clone());
        self.ledger.update(
            &item.dirpath,
            &content_hash(&item.files),
            LedgerStatus::Pending,
            &item.files,
            Some(metadata),
        )
    }

    /// Re-run provider enrichment for a queue item, optionally with an
    /// operator-supplied title and author.
    pub async fn research_item(
        &self,
        item: &QueueItem,
        title: Option<String>,
        author: Option<String>,
    ) -> Vec<crate::services::Identification> {
        let query = title
            .or_else(|| item.metadata.title.clone())
            .unwrap_or_default();
        let author = author.or_else(|| item.metadata.author.clone());
        if query.is_empty() {
            return Vec::new();
        }
        self.aggregator.search_all(&query, author.as_deref()).await
    }
}
