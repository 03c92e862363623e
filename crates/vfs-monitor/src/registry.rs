//! Handle registry backed by a slot arena.
//!
//! Entries live in a dense vector of slots; freed slots are recycled through a
//! free list. The id counter is independent of slot reuse, so a recycled slot
//! always carries a fresh id. Two indexes sit beside the arena:
//!
//! - `by_id` maps a [`HandleId`] to its slot for drain-time lookup
//! - `by_path` maps a watched path to the ids watching it for feed lookup
//!
//! A third map resolves backend subscription tokens to ids.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use vfs_core::VfsPath;

use crate::backend::SubscriptionToken;
use crate::handle::{Callback, HandleId, WatchKind};

/// A registered watch as stored inside the monitor.
pub(crate) struct HandleEntry {
    pub id: HandleId,
    pub path: VfsPath,
    pub kind: WatchKind,
    pub callback: Callback,
    pub token: Option<SubscriptionToken>,
}

#[derive(Default)]
pub(crate) struct HandleRegistry {
    slots: Vec<Option<HandleEntry>>,
    free: Vec<usize>,
    by_id: FxHashMap<HandleId, usize>,
    by_path: FxHashMap<VfsPath, SmallVec<[HandleId; 2]>>,
    by_token: FxHashMap<SubscriptionToken, HandleId>,
    current_id: u64,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next handle id.
    pub fn next_id(&mut self) -> HandleId {
        self.current_id += 1;
        HandleId(self.current_id)
    }

    /// Stores an entry and returns its slot index.
    pub fn insert(&mut self, entry: HandleEntry) -> usize {
        let id = entry.id;
        self.by_path.entry(entry.path.clone()).or_default().push(id);
        if let Some(token) = &entry.token {
            self.by_token.insert(token.clone(), id);
        }

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                let slot = self.slots.len();
                self.slots.push(Some(entry));
                slot
            }
        };
        self.by_id.insert(id, slot);
        slot
    }

    /// Removes the entry in `slot` if it still belongs to `id`.
    pub fn remove(&mut self, id: HandleId, slot: usize) -> Option<HandleEntry> {
        let entry = self
            .slots
            .get_mut(slot)?
            .take_if(|entry| entry.id == id)?;

        self.free.push(slot);
        self.by_id.remove(&id);
        if let Some(token) = &entry.token {
            self.by_token.remove(token);
        }
        if let Some(ids) = self.by_path.get_mut(&entry.path) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_path.remove(&entry.path);
            }
        }
        Some(entry)
    }

    pub fn get(&self, id: HandleId) -> Option<&HandleEntry> {
        let slot = *self.by_id.get(&id)?;
        self.slots.get(slot)?.as_ref()
    }

    /// Returns every entry watching exactly `path`.
    pub fn watchers<'a>(
        &'a self,
        path: &VfsPath,
    ) -> impl Iterator<Item = &'a HandleEntry> + use<'a> {
        self.by_path
            .get(path)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(*id))
    }

    pub fn id_for_token(&self, token: &SubscriptionToken) -> Option<HandleId> {
        self.by_token.get(token).copied()
    }

    /// Forgets every backend token and returns them.
    pub fn take_tokens(&mut self) -> Vec<SubscriptionToken> {
        self.by_token.clear();
        self.slots
            .iter_mut()
            .flatten()
            .filter_map(|entry| entry.token.take())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Drops every entry. Ids keep counting from where they were.
    pub fn clear(&mut self) -> Vec<HandleEntry> {
        self.free.clear();
        self.by_id.clear();
        self.by_path.clear();
        self.by_token.clear();
        self.slots.drain(..).flatten().collect()
    }
}
