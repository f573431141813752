//! File-system watcher: bridges `notify` events into the watch planner and
//! applies drained actions through the indexing engine. One watcher task
//! per repository feeds the bounded indexing pool and never blocks on it.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::config::EngineConfig;
use crate::application::indexer::{default_ignored, IndexingEngine};
use crate::application::watcher::{WatchAction, WatchPlanner};
use crate::domain::{EngineError, Repository};

const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

pub struct FsWatcher {
    repo: Repository,
    engine: Arc<IndexingEngine>,
    planner: Mutex<WatchPlanner>,
}

impl FsWatcher {
    pub fn new(repo: Repository, engine: Arc<IndexingEngine>, config: &EngineConfig) -> Self {
        let planner = WatchPlanner::new(
            config.debounce,
            config.tombstone_ttl,
            config.watch_queue_capacity,
        );
        Self {
            repo,
            engine,
            planner: Mutex::new(planner),
        }
    }

    /// Watch until cancelled. Incremental updates flow through the same
    /// engine paths the batch indexer uses.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), EngineError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher =
            notify::recommended_watcher(move |event: Result<Event, notify::Error>| {
                let _ = tx.send(event);
            })
            .map_err(|e| EngineError::internal(format!("failed to create watcher: {}", e)))?;
        watcher
            .watch(self.repo.root(), RecursiveMode::Recursive)
            .map_err(|e| EngineError::internal(format!("failed to watch root: {}", e)))?;

        info!("Watching {}", self.repo.root().display());
        let mut tick = tokio::time::interval(DRAIN_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(event) = rx.recv() => {
                    match event {
                        Ok(event) => self.handle_event(event).await,
                        Err(e) => warn!("Watcher error: {}", e),
                    }
                }
                _ = tick.tick() => self.drain().await,
            }
        }

        info!("Watcher for {} stopped", self.repo.id());
        Ok(())
    }

    async fn handle_event(&self, event: Event) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any) | EventKind::Modify(ModifyKind::Metadata(_)) => {
                for path in event.paths {
                    self.note_change(&path).await;
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if event.paths.len() == 2 {
                    self.handle_rename(&event.paths[0], &event.paths[1]).await;
                } else {
                    for path in event.paths {
                        self.note_change(&path).await;
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in event.paths {
                    self.note_remove(&path).await;
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in event.paths {
                    self.note_change(&path).await;
                }
            }
            EventKind::Remove(_) => {
                for path in event.paths {
                    self.note_remove(&path).await;
                }
            }
            _ => {}
        }
    }

    async fn note_change(&self, path: &Path) {
        if !path.is_file() {
            return;
        }
        // Symlinks pointing out of the root resolve to OutsidePath here
        // and are dropped.
        let Ok(relative) = self.repo.resolve(path) else {
            return;
        };
        if default_ignored(&relative) {
            return;
        }
        self.engine.hashes().invalidate(path);
        self.planner
            .lock()
            .await
            .note_change(path.to_path_buf(), Instant::now());
    }

    async fn note_remove(&self, path: &Path) {
        let Ok(relative) = self.repo.resolve(path) else {
            return;
        };
        if default_ignored(&relative) {
            return;
        }
        // Deletes apply immediately (soft): rows hide from queries now and
        // either revive as a rename or hard-delete when the tombstone dies.
        let content_hash = match self.engine.soft_delete(&self.repo, &relative).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!("Soft delete of {} failed: {}", relative, e);
                None
            }
        };
        debug!("Soft-deleted {}", relative);
        self.planner
            .lock()
            .await
            .note_removed(path, relative, content_hash, Instant::now());
    }

    async fn handle_rename(&self, from: &Path, to: &Path) {
        let old_relative = self.repo.resolve(from).ok();
        let new_relative = self.repo.resolve(to).ok();

        match (old_relative, new_relative) {
            (Some(old), Some(new)) => {
                let stored_hash = match self.engine.store().find_file(self.repo.id(), &old).await {
                    Ok(Some(file)) => Some(file.content_hash().to_string()),
                    _ => None,
                };
                let new_hash = self.engine.hashes().content_hash(to).ok();

                if stored_hash.is_some() && stored_hash == new_hash {
                    // Content unchanged: rename rows and vector payloads,
                    // no parser and no embedding provider involved.
                    if let Err(e) = self.engine.rename(&self.repo, &old, &new).await {
                        warn!("Rename {} -> {} failed: {}", old, new, e);
                    }
                } else {
                    self.note_remove(from).await;
                    self.note_change(to).await;
                }
            }
            (Some(_), None) => self.note_remove(from).await,
            (None, Some(_)) => self.note_change(to).await,
            (None, None) => {}
        }
    }

    async fn drain(&self) {
        let actions = {
            let mut planner = self.planner.lock().await;
            planner.drain_ready(Instant::now())
        };

        for action in actions {
            match action {
                WatchAction::Reindex(path) => {
                    // A create whose bytes match a live tombstone is the
                    // second half of a move: revive instead of re-indexing.
                    let revived = match self.engine.hashes().content_hash(&path).ok() {
                        Some(hash) => {
                            let mut planner = self.planner.lock().await;
                            planner.take_tombstone(&hash, Instant::now())
                        }
                        None => None,
                    };

                    match (revived, self.repo.resolve(&path)) {
                        (Some(old), Ok(new)) if old != new => {
                            if let Err(e) = self.engine.rename(&self.repo, &old, &new).await {
                                warn!("Revive {} -> {} failed: {}", old, new, e);
                            }
                        }
                        (Some(same), Ok(_)) => {
                            // Deleted and re-created in place: the rename op
                            // just clears the tombstone.
                            if let Err(e) = self.engine.rename(&self.repo, &same, &same).await {
                                warn!("Revive of {} failed: {}", same, e);
                            }
                        }
                        _ => {
                            let outcome = self.engine.index_file(&self.repo, &path, false).await;
                            debug!("Watched reindex of {}: {:?}", path.display(), outcome);
                        }
                    }
                }
                WatchAction::HardDelete(relative) => {
                    if let Err(e) = self.engine.hard_delete(&self.repo, &relative).await {
                        warn!("Hard delete of {} failed: {}", relative, e);
                    }
                }
            }
        }
    }
}
