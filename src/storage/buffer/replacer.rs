use linked_hash_map::LinkedHashMap;

use crate::common::types::FrameId;

/// LRU replacement policy over unpinned frames. The ordered map keeps
/// insertion order (front = least recently used) with O(1) membership,
/// removal, and victim pop.
pub struct LruReplacer {
    entries: LinkedHashMap<FrameId, ()>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self {
            entries: LinkedHashMap::new(),
        }
    }

    /// Mark a frame evictable. Re-inserting an already-present frame moves
    /// it to the most-recently-used end.
    pub fn insert(&mut self, frame_id: FrameId) {
        self.entries.remove(&frame_id);
        self.entries.insert(frame_id, ());
    }

    /// Remove a frame from the candidate set, e.g. because it got pinned.
    pub fn erase(&mut self, frame_id: FrameId) -> bool {
        self.entries.remove(&frame_id).is_some()
    }

    /// Pop and return the least recently used frame.
    pub fn victim(&mut self) -> Option<FrameId> {
        self.entries.pop_front().map(|(frame_id, ())| frame_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}
