use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::world::{ChunkPos, ChunkRef};

/// Two-tier index of resident chunks.
///
/// `pinned` chunks are never evicted; `dirty` chunks have edits that are not
/// persisted yet. There is no clean tier: a chunk that is neither pinned nor
/// dirty is dropped from the cache and reloaded on its next request.
///
/// At most one instance is resident per coordinate. Callers pass the
/// coordinate explicitly; the cache never locks a chunk.
#[derive(Default)]
pub struct ChunkCache {
    pinned: FxHashMap<ChunkPos, ChunkRef>,
    dirty: FxHashMap<ChunkPos, ChunkRef>,
    flush_order: VecDeque<ChunkPos>,
    // Positions currently in `flush_order`, each queued at most once.
    queued: FxHashSet<ChunkPos>,
}

impl ChunkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pos: ChunkPos) -> Option<ChunkRef> {
        self.pinned
            .get(&pos)
            .or_else(|| self.dirty.get(&pos))
            .cloned()
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.pinned.contains_key(&pos) || self.dirty.contains_key(&pos)
    }

    /// Is `chunk` the instance resident at `pos`, or could it become it?
    fn accepts(&self, pos: ChunkPos, chunk: &ChunkRef) -> bool {
        self.get(pos).is_none_or(|live| Arc::ptr_eq(&live, chunk))
    }

    /// Records `chunk` as dirty. Returns `false` and leaves the cache alone
    /// if another instance is resident at `pos`.
    pub fn dirtied(&mut self, pos: ChunkPos, chunk: &ChunkRef) -> bool {
        if !self.accepts(pos, chunk) {
            return false;
        }
        self.dirty.insert(pos, chunk.clone());
        if self.queued.insert(pos) {
            self.flush_order.push_back(pos);
        }
        true
    }

    /// Only called once the chunk's state has been persisted. Returns
    /// `false` if `chunk` is not the dirty instance at `pos`.
    pub fn cleaned(&mut self, pos: ChunkPos, chunk: &ChunkRef) -> bool {
        match self.dirty.get(&pos) {
            Some(live) if Arc::ptr_eq(live, chunk) => {
                self.dirty.remove(&pos);
                true
            }
            _ => false,
        }
    }

    /// Pins the instance resident at `pos`, or `chunk` if there is none.
    /// Returns the pinned instance.
    pub fn pin(&mut self, pos: ChunkPos, chunk: &ChunkRef) -> ChunkRef {
        let live = self.get(pos).unwrap_or_else(|| chunk.clone());
        self.pinned.insert(pos, live.clone());
        live
    }

    pub fn unpin(&mut self, pos: ChunkPos) -> Option<ChunkRef> {
        self.pinned.remove(&pos)
    }

    pub fn is_pinned(&self, pos: ChunkPos) -> bool {
        self.pinned.contains_key(&pos)
    }

    pub fn is_dirty(&self, pos: ChunkPos) -> bool {
        self.dirty.contains_key(&pos)
    }

    /// Next dirty chunk to flush, round robin so one chunk that keeps
    /// failing to save, or keeps getting edited, cannot starve the rest.
    pub fn next_dirty(&mut self) -> Option<(ChunkPos, ChunkRef)> {
        while let Some(pos) = self.flush_order.pop_front() {
            if let Some(chunk) = self.dirty.get(&pos) {
                self.flush_order.push_back(pos);
                return Some((pos, chunk.clone()));
            }
            self.queued.remove(&pos);
        }
        None
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    pub fn pinned_len(&self) -> usize {
        self.pinned.len()
    }

    /// Distinct resident chunks.
    pub fn len(&self) -> usize {
        self.pinned.len()
            + self
                .dirty
                .keys()
                .filter(|pos| !self.pinned.contains_key(pos))
                .count()
    }

    pub fn is_empty(&self) -> bool {
        self.pinned.is_empty() && self.dirty.is_empty()
    }

    pub fn dirty_coords(&self) -> Vec<ChunkPos> {
        self.dirty.keys().copied().collect()
    }

    pub fn pinned_coords(&self) -> Vec<ChunkPos> {
        self.pinned.keys().copied().collect()
    }

    /// Every resident chunk once.
    pub fn resident(&self) -> Vec<(ChunkPos, ChunkRef)> {
        let mut chunks: Vec<(ChunkPos, ChunkRef)> = self
            .pinned
            .iter()
            .map(|(pos, chunk)| (*pos, chunk.clone()))
            .collect();
        chunks.extend(
            self.dirty
                .iter()
                .filter(|(pos, _)| !self.pinned.contains_key(*pos))
                .map(|(pos, chunk)| (*pos, chunk.clone())),
        );
        chunks
    }

    #[cfg(test)]
    fn queue_len(&self) -> usize {
        self.flush_order.len()
    }
}
