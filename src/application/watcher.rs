//! Watch planner: turns raw file-system events into indexing actions. The
//! planner is pure state (times are passed in), so the debounce, tombstone
//! and overflow rules are unit-testable without a real watcher.
//!
//! Rules: creates/modifies are debounced and coalesced; deletes act
//! immediately and are never dropped; a delete followed within the
//! tombstone TTL by a create with the same content hash becomes a rename.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::warn;

/// What the watcher should do next, in drain order.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchAction {
    /// Debounce elapsed: re-index this path with `force=false`.
    Reindex(PathBuf),
    /// Tombstone expired with no matching create: remove the rows and the
    /// file's vector points for good.
    HardDelete(String),
}

#[derive(Debug)]
struct PendingChange {
    last_event: Instant,
}

#[derive(Debug)]
struct Tombstone {
    relative_path: String,
    deleted_at: Instant,
}

pub struct WatchPlanner {
    debounce: Duration,
    tombstone_ttl: Duration,
    capacity: usize,
    /// create/modify events waiting out their quiet period
    pending: HashMap<PathBuf, PendingChange>,
    /// insertion order of `pending`, for overflow eviction
    order: Vec<PathBuf>,
    /// content hash → soft-deleted row awaiting a matching create
    tombstones: HashMap<String, Tombstone>,
}

impl WatchPlanner {
    pub fn new(debounce: Duration, tombstone_ttl: Duration, capacity: usize) -> Self {
        Self {
            debounce,
            tombstone_ttl,
            capacity: capacity.max(1),
            pending: HashMap::new(),
            order: Vec::new(),
            tombstones: HashMap::new(),
        }
    }

    /// Record a create or modify. Rapid bursts on the same path coalesce
    /// into one action; overflow drops the oldest pending change (deletes
    /// are tracked separately and are never dropped).
    pub fn note_change(&mut self, path: PathBuf, now: Instant) {
        if let Some(pending) = self.pending.get_mut(&path) {
            pending.last_event = now;
            return;
        }
        if self.pending.len() >= self.capacity {
            if let Some(oldest) = self.order.first().cloned() {
                self.order.remove(0);
                self.pending.remove(&oldest);
                warn!(
                    "Watch queue full ({}); dropping change event for {}",
                    self.capacity,
                    oldest.display()
                );
            }
        }
        self.order.push(path.clone());
        self.pending.insert(path, PendingChange { last_event: now });
    }

    /// Record a delete that was already soft-applied. The content hash (from
    /// the store row, when one existed) keys the tombstone so a re-created
    /// identical file can be recognized as a move.
    pub fn note_removed(
        &mut self,
        abs_path: &std::path::Path,
        relative_path: String,
        content_hash: Option<String>,
        now: Instant,
    ) {
        // A pending change for the removed path is moot.
        if let Some(pos) = self.order.iter().position(|p| p == abs_path) {
            let stale = self.order.remove(pos);
            self.pending.remove(&stale);
        }
        if let Some(hash) = content_hash {
            self.tombstones.insert(
                hash,
                Tombstone {
                    relative_path,
                    deleted_at: now,
                },
            );
        }
    }

    /// Claim the tombstone matching `content_hash`, if one is still live.
    /// Returns the old relative path; the caller turns it into a rename.
    pub fn take_tombstone(&mut self, content_hash: &str, now: Instant) -> Option<String> {
        match self.tombstones.get(content_hash) {
            Some(tombstone) if now.duration_since(tombstone.deleted_at) <= self.tombstone_ttl => {
                self.tombstones
                    .remove(content_hash)
                    .map(|t| t.relative_path)
            }
            _ => None,
        }
    }

    /// Actions whose wait is over: quiet changes and expired tombstones.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<WatchAction> {
        let mut actions = Vec::new();

        let ready: Vec<PathBuf> = self
            .order
            .iter()
            .filter(|path| {
                self.pending
                    .get(*path)
                    .is_some_and(|p| now.duration_since(p.last_event) >= self.debounce)
            })
            .cloned()
            .collect();
        for path in ready {
            self.order.retain(|p| p != &path);
            self.pending.remove(&path);
            actions.push(WatchAction::Reindex(path));
        }

        let expired: Vec<String> = self
            .tombstones
            .iter()
            .filter(|(_, t)| now.duration_since(t.deleted_at) > self.tombstone_ttl)
            .map(|(hash, _)| hash.clone())
            .collect();
        for hash in expired {
            if let Some(tombstone) = self.tombstones.remove(&hash) {
                actions.push(WatchAction::HardDelete(tombstone.relative_path));
            }
        }

        actions
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn tombstone_len(&self) -> usize {
        self.tombstones.len()
    }
}
