//! Concurrent B+ tree over fixed-layout pages, using latch coupling:
//! a descent latches a child before giving up its parent, and a write
//! descent drops all ancestor latches the moment a child proves *safe*
//! (it cannot split on insert, cannot underflow on remove). Because a
//! split or collapse can replace the root page itself, write descents
//! additionally serialize on a root latch that also guards the root page
//! id; reads go straight to the root page.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use parking_lot::lock_api::{ArcMutexGuard, ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawMutex, RawRwLock};

use crate::common::types::{PageId, PageType, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::codec::KeyCodec;
use crate::index::btree::error::{BTreeError, Result};
use crate::index::btree::iterator::TreeIterator;
use crate::index::btree::node::{self, INTERNAL_HEADER_SIZE, LEAF_HEADER_SIZE};
use crate::index::btree::{internal, leaf};
use crate::storage::buffer::BufferPoolManager;

/// Page 1 of the database file records the root page id so an index
/// survives restarts.
pub const HEADER_PAGE_ID: PageId = 1;
const HEADER_ROOT_OFFSET: usize = 8;

type PageReadGuard = ArcRwLockReadGuard<RawRwLock, crate::common::types::Page>;
type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, crate::common::types::Page>;
type RootGuard = ArcMutexGuard<RawMutex, ()>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Insert,
    Remove,
}

/// The latch path of one write descent, in descent order (index 0 is the
/// topmost page still held). Owns the root latch until the descent proves
/// the root cannot change.
struct WritePath {
    entries: Vec<(PageId, PageWriteGuard)>,
    root_guard: Option<RootGuard>,
}

impl WritePath {
    /// A safe child was latched: unlatch and unpin everything above it,
    /// in descent order, and let go of the root latch.
    fn release_ancestors(&mut self, buffer_pool: &BufferPoolManager) {
        self.root_guard = None;
        let keep = self.entries.pop();
        for (page_id, guard) in self.entries.drain(..) {
            drop(guard);
            let _ = buffer_pool.unpin_page(page_id, false);
        }
        if let Some(entry) = keep {
            self.entries.push(entry);
        }
    }

    /// The operation is complete: unlatch and unpin the remaining path.
    fn release_all(&mut self, buffer_pool: &BufferPoolManager, dirty: bool) {
        self.root_guard = None;
        for (page_id, guard) in self.entries.drain(..) {
            drop(guard);
            let _ = buffer_pool.unpin_page(page_id, dirty);
        }
    }

    /// Drop the deepest entry, unpinning it dirty.
    fn pop_dirty(&mut self, buffer_pool: &BufferPoolManager) -> PageId {
        let (page_id, guard) = self.entries.pop().expect("empty write path");
        drop(guard);
        let _ = buffer_pool.unpin_page(page_id, true);
        page_id
    }
}

/// What a coalesce-or-redistribute round did at one level.
enum RebalanceOutcome {
    /// Two pages merged; the named page emptied out and must be dropped,
    /// and the parent may now underflow.
    Merged { emptied: PageId },
    /// Entries moved between siblings; separators are fixed up, done.
    Redistributed,
}

/// B+ tree index keyed by any fixed-size-encodable ordered key; leaf
/// values are record ids. Unique keys only.
pub struct BPlusTree<K: KeyCodec> {
    buffer_pool: Arc<BufferPoolManager>,
    root_page_id: AtomicU32,
    root_latch: Arc<Mutex<()>>,
    leaf_max_size: usize,
    internal_max_size: usize,
    _marker: PhantomData<K>,
}

impl<K: KeyCodec> BPlusTree<K> {
    /// Open the index, deriving node fan-out from the page capacity and
    /// the key/value sizes. Creates the header page on a fresh database,
    /// otherwise adopts the root recorded there.
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Result<Self> {
        let leaf_max = (PAGE_SIZE - LEAF_HEADER_SIZE) / (K::ENCODED_SIZE + Rid::ENCODED_SIZE);
        let internal_max = (PAGE_SIZE - INTERNAL_HEADER_SIZE) / (K::ENCODED_SIZE + 4);
        Self::with_max_sizes(buffer_pool, leaf_max, internal_max)
    }

    /// Open with explicit fan-out limits. Shape tests use tiny limits to
    /// force splits and merges with few keys.
    pub fn with_max_sizes(
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        debug_assert!(leaf_max_size >= 2 && internal_max_size >= 3);

        let num_pages = buffer_pool
            .disk_manager()
            .num_pages()
            .map_err(crate::storage::buffer::BufferPoolError::from)?;
        let root_page_id = if num_pages == 0 {
            let (header, header_id) = buffer_pool.new_page()?;
            debug_assert_eq!(header_id, HEADER_PAGE_ID);
            {
                let mut guard = header.write();
                guard.set_page_type(PageType::Header);
                LittleEndian::write_u32(
                    &mut guard.data[HEADER_ROOT_OFFSET..HEADER_ROOT_OFFSET + 4],
                    INVALID_PAGE_ID,
                );
            }
            buffer_pool.unpin_page(header_id, true)?;
            INVALID_PAGE_ID
        } else {
            let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
            let root = {
                let guard = header.read();
                if guard.page_type() != PageType::Header {
                    drop(guard);
                    buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;
                    return Err(BTreeError::Corrupt(
                        "page 1 is not an index header page".to_string(),
                    ));
                }
                LittleEndian::read_u32(&guard.data[HEADER_ROOT_OFFSET..HEADER_ROOT_OFFSET + 4])
            };
            buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;
            root
        };

        Ok(Self {
            buffer_pool,
            root_page_id: AtomicU32::new(root_page_id),
            root_latch: Arc::new(Mutex::new(())),
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    /// Point lookup. Read-latch-couples from the root; no root latch.
    pub fn get(&self, key: &K) -> Result<Option<Rid>> {
        let (page_id, guard) = match self.find_leaf_read(Some(key))? {
            Some(found) => found,
            None => return Ok(None),
        };
        let result = leaf::lookup::<K>(&guard, key);
        drop(guard);
        self.buffer_pool.unpin_page(page_id, false)?;
        Ok(result)
    }

    /// Insert a unique key. Returns false (and changes nothing) when the
    /// key is already present.
    pub fn insert(&self, key: K, value: Rid) -> Result<bool> {
        let root_guard = self.root_latch.lock_arc();
        if self.root_page_id() == INVALID_PAGE_ID {
            self.start_new_tree(key, value)?;
            drop(root_guard);
            return Ok(true);
        }

        let mut path = self.find_leaf_write(&key, WriteOp::Insert, root_guard)?;
        let duplicate = {
            let (_, leaf_guard) = path.entries.last().expect("descent reached no leaf");
            leaf::lookup::<K>(leaf_guard, &key).is_some()
        };
        if duplicate {
            path.release_all(&self.buffer_pool, false);
            return Ok(false);
        }

        let has_room = {
            let (_, leaf_guard) = path.entries.last().expect("descent reached no leaf");
            node::size(leaf_guard) < node::max_size(leaf_guard)
        };
        if has_room {
            let (_, leaf_guard) = path.entries.last_mut().expect("descent reached no leaf");
            leaf::insert(leaf_guard, key, value);
            path.release_all(&self.buffer_pool, true);
            return Ok(true);
        }

        self.split_leaf_and_insert(&mut path, key, value)?;
        path.release_all(&self.buffer_pool, true);
        Ok(true)
    }

    /// Delete a key; absent keys are a no-op.
    pub fn remove(&self, key: &K) -> Result<()> {
        let root_guard = self.root_latch.lock_arc();
        if self.root_page_id() == INVALID_PAGE_ID {
            drop(root_guard);
            return Ok(());
        }

        let mut path = self.find_leaf_write(key, WriteOp::Remove, root_guard)?;
        let (removed, underflow) = {
            let (_, leaf_guard) = path.entries.last_mut().expect("descent reached no leaf");
            let before = node::size(leaf_guard);
            let after = leaf::remove::<K>(leaf_guard, key);
            (after != before, after < node::min_size(leaf_guard))
        };

        if !removed {
            path.release_all(&self.buffer_pool, false);
            return Ok(());
        }
        if underflow {
            self.coalesce_or_redistribute(&mut path)?;
        }
        path.release_all(&self.buffer_pool, true);
        Ok(())
    }

    /// Iterator over the whole tree in key order.
    pub fn begin(&self) -> Result<TreeIterator<K>> {
        match self.find_leaf_read(None)? {
            None => Ok(TreeIterator::end(Arc::clone(&self.buffer_pool))),
            Some((page_id, guard)) => {
                let ptr = Arc::clone(ArcRwLockReadGuard::rwlock(&guard));
                drop(guard);
                TreeIterator::new(Arc::clone(&self.buffer_pool), ptr, page_id, 0)
            }
        }
    }

    /// Iterator positioned at the first key >= `key`.
    pub fn begin_at(&self, key: &K) -> Result<TreeIterator<K>> {
        match self.find_leaf_read(Some(key))? {
            None => Ok(TreeIterator::end(Arc::clone(&self.buffer_pool))),
            Some((page_id, guard)) => {
                let index = leaf::key_index::<K>(&guard, key);
                let ptr = Arc::clone(ArcRwLockReadGuard::rwlock(&guard));
                drop(guard);
                TreeIterator::new(Arc::clone(&self.buffer_pool), ptr, page_id, index)
            }
        }
    }

    /// Walk the whole tree checking the structural invariants: occupancy
    /// bounds, strictly increasing keys, parent pointers, and separator
    /// keys equal to the minimum of the subtree they dominate. Intended
    /// for tests; takes no latches.
    pub fn validate(&self) -> Result<()> {
        let root = self.root_page_id();
        if root == INVALID_PAGE_ID {
            return Ok(());
        }
        self.validate_node(root, INVALID_PAGE_ID)?;
        self.validate_leaf_chain()?;
        Ok(())
    }

    fn start_new_tree(&self, key: K, value: Rid) -> Result<()> {
        let (page, page_id) = self.buffer_pool.new_page()?;
        {
            let mut guard = page.write();
            leaf::init::<K>(&mut guard, page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf::insert(&mut guard, key, value);
        }
        self.update_root_page_id(page_id)?;
        self.buffer_pool.unpin_page(page_id, true)?;
        Ok(())
    }

    /// Record a root change in the header page. Callers hold the root
    /// latch.
    fn update_root_page_id(&self, new_root: PageId) -> Result<()> {
        self.root_page_id.store(new_root, Ordering::SeqCst);
        let header = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut guard = header.write();
            LittleEndian::write_u32(
                &mut guard.data[HEADER_ROOT_OFFSET..HEADER_ROOT_OFFSET + 4],
                new_root,
            );
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }

    /// Read descent: latch the child, then release the parent. `None`
    /// key steers to the leftmost leaf.
    fn find_leaf_read(&self, key: Option<&K>) -> Result<Option<(PageId, PageReadGuard)>> {
        let mut page_id = self.root_page_id();
        if page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let ptr = self.buffer_pool.fetch_page(page_id)?;
        let mut guard = ptr.read_arc();
        while !node::is_leaf(&guard) {
            let child_id = match key {
                Some(key) => internal::lookup::<K>(&guard, key),
                None => internal::value_at::<K>(&guard, 0),
            };
            let child_ptr = match self.buffer_pool.fetch_page(child_id) {
                Ok(ptr) => ptr,
                Err(e) => {
                    drop(guard);
                    let _ = self.buffer_pool.unpin_page(page_id, false);
                    return Err(e.into());
                }
            };
            let child_guard = child_ptr.read_arc();
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false)?;
            guard = child_guard;
            page_id = child_id;
        }
        Ok(Some((page_id, guard)))
    }

    /// Write descent with latch crabbing. Ancestors (and the root latch)
    /// are released as soon as a latched child is safe for `op`.
    fn find_leaf_write(&self, key: &K, op: WriteOp, root_guard: RootGuard) -> Result<WritePath> {
        let mut path = WritePath {
            entries: Vec::new(),
            root_guard: Some(root_guard),
        };
        let mut page_id = self.root_page_id();
        loop {
            let ptr = match self.buffer_pool.fetch_page(page_id) {
                Ok(ptr) => ptr,
                Err(e) => {
                    path.release_all(&self.buffer_pool, false);
                    return Err(e.into());
                }
            };
            let guard = ptr.write_arc();
            let is_leaf = node::is_leaf(&guard);
            let safe = match op {
                WriteOp::Insert => node::size(&guard) < node::max_size(&guard),
                WriteOp::Remove => node::size(&guard) > node::min_size(&guard),
            };
            let next = if is_leaf {
                INVALID_PAGE_ID
            } else {
                internal::lookup::<K>(&guard, key)
            };

            path.entries.push((page_id, guard));
            if safe && path.entries.len() > 1 {
                path.release_ancestors(&self.buffer_pool);
            }
            if is_leaf {
                return Ok(path);
            }
            page_id = next;
        }
    }

    /// The target leaf is full: split it, thread the leaf chain, place
    /// the new key, and push the split key into the parent. The split
    /// point is chosen on the conceptual max+1-entry state (the full
    /// leaf plus the pending key), so both halves end up at or above
    /// ⌈max/2⌉ whichever side the new key falls on.
    fn split_leaf_and_insert(&self, path: &mut WritePath, key: K, value: Rid) -> Result<()> {
        let (new_ptr, new_leaf_id) = self.buffer_pool.new_page()?;
        let mut new_guard = new_ptr.write_arc();

        let split_key = {
            let (_, leaf_guard) = path.entries.last_mut().expect("empty write path");
            leaf::init::<K>(
                &mut new_guard,
                new_leaf_id,
                node::parent_page_id(leaf_guard),
                self.leaf_max_size,
            );

            let size = node::size(leaf_guard);
            let insert_at = leaf::key_index::<K>(leaf_guard, &key);
            // The new right leaf holds ⌈(size+1)/2⌉ entries once the
            // pending key has landed.
            let right_count = (size + 2) / 2;
            let left_count = size + 1 - right_count;
            let split_at = if insert_at < left_count {
                left_count - 1
            } else {
                left_count
            };
            leaf::split_off::<K>(leaf_guard, &mut new_guard, split_at);
            leaf::set_next_page_id(&mut new_guard, leaf::next_page_id(leaf_guard));
            leaf::set_next_page_id(leaf_guard, new_leaf_id);

            if insert_at < left_count {
                leaf::insert(leaf_guard, key, value);
            } else {
                leaf::insert(&mut new_guard, key, value);
            }
            leaf::key_at::<K>(&new_guard, 0)
        };

        let child_index = path.entries.len() - 1;
        self.insert_into_parent(path, child_index, split_key, new_leaf_id, new_guard)
    }

    /// Insert the separator produced by a split into the parent of the
    /// node at `child_index`, recursing on further splits. Consumes the
    /// right sibling's latch and pin.
    fn insert_into_parent(
        &self,
        path: &mut WritePath,
        child_index: usize,
        key: K,
        right_id: PageId,
        mut right_guard: PageWriteGuard,
    ) -> Result<()> {
        let left_is_root = node::is_root(&path.entries[child_index].1);
        if left_is_root {
            // The root split: build a new root over the two halves. The
            // root latch is still held, or the split could not have
            // reached this level.
            debug_assert!(path.root_guard.is_some());
            let (root_ptr, new_root_id) = self.buffer_pool.new_page()?;
            {
                let mut root_guard = root_ptr.write();
                internal::init::<K>(
                    &mut root_guard,
                    new_root_id,
                    INVALID_PAGE_ID,
                    self.internal_max_size,
                );
                let (left_id, left_guard) = &mut path.entries[child_index];
                internal::populate_new_root::<K>(&mut root_guard, *left_id, key, right_id);
                node::set_parent_page_id(left_guard, new_root_id);
                node::set_parent_page_id(&mut right_guard, new_root_id);
            }
            self.buffer_pool.unpin_page(new_root_id, true)?;
            drop(right_guard);
            self.buffer_pool.unpin_page(right_id, true)?;
            self.update_root_page_id(new_root_id)?;
            return Ok(());
        }

        // A non-root split means the node was full at descent time, so
        // its parent latch is still in the path.
        debug_assert!(child_index > 0);
        let parent_has_room = {
            let (_, parent_guard) = &path.entries[child_index - 1];
            node::size(parent_guard) < node::max_size(parent_guard)
        };

        if parent_has_room {
            let left_id = path.entries[child_index].0;
            let (parent_id, parent_guard) = &mut path.entries[child_index - 1];
            internal::insert_node_after::<K>(parent_guard, left_id, key, right_id);
            node::set_parent_page_id(&mut right_guard, *parent_id);
            drop(right_guard);
            self.buffer_pool.unpin_page(right_id, true)?;
            return Ok(());
        }

        // Full parent: split it and recurse one level up. Like the leaf
        // case, the split point comes from the conceptual max+1-entry
        // state so neither half can land below ⌈max/2⌉.
        let (new_ptr, new_internal_id) = self.buffer_pool.new_page()?;
        let mut new_internal_guard = new_ptr.write_arc();
        let left_id = path.entries[child_index].0;
        let (mid_key, moved_children) = {
            let (parent_id, parent_guard) = &mut path.entries[child_index - 1];
            internal::init::<K>(
                &mut new_internal_guard,
                new_internal_id,
                node::parent_page_id(parent_guard),
                self.internal_max_size,
            );

            let size = node::size(parent_guard);
            let insert_pos = internal::value_index::<K>(parent_guard, left_id) + 1;
            let right_count = (size + 2) / 2;
            let left_count = size + 1 - right_count;

            if insert_pos < left_count {
                // The new entry stays in the old parent.
                let moved =
                    internal::split_off::<K>(parent_guard, &mut new_internal_guard, left_count - 1);
                internal::insert_node_after::<K>(parent_guard, left_id, key, right_id);
                node::set_parent_page_id(&mut right_guard, *parent_id);
                (internal::key_at::<K>(&new_internal_guard, 0), moved)
            } else if insert_pos == left_count {
                // The new entry becomes the first slot of the new node,
                // and its key is the separator pushed up.
                let moved =
                    internal::split_off::<K>(parent_guard, &mut new_internal_guard, left_count);
                internal::push_front::<K>(&mut new_internal_guard, key, right_id);
                node::set_parent_page_id(&mut right_guard, new_internal_id);
                (key, moved)
            } else {
                let moved =
                    internal::split_off::<K>(parent_guard, &mut new_internal_guard, left_count);
                internal::insert_node_after::<K>(&mut new_internal_guard, left_id, key, right_id);
                node::set_parent_page_id(&mut right_guard, new_internal_id);
                (internal::key_at::<K>(&new_internal_guard, 0), moved)
            }
        };
        self.reparent_children(path, &moved_children, new_internal_id)?;
        drop(right_guard);
        self.buffer_pool.unpin_page(right_id, true)?;

        self.insert_into_parent(path, child_index - 1, mid_key, new_internal_id, new_internal_guard)
    }

    /// Point the moved children at their new parent. A moved child that
    /// sits latched in our own path is updated through that latch; the
    /// rest are fetched briefly.
    fn reparent_children(
        &self,
        path: &mut WritePath,
        children: &[PageId],
        new_parent: PageId,
    ) -> Result<()> {
        for &child_id in children {
            if let Some((_, guard)) = path
                .entries
                .iter_mut()
                .find(|(page_id, _)| *page_id == child_id)
            {
                node::set_parent_page_id(guard, new_parent);
                continue;
            }
            let ptr = self.buffer_pool.fetch_page(child_id)?;
            {
                let mut guard = ptr.write();
                node::set_parent_page_id(&mut guard, new_parent);
            }
            self.buffer_pool.unpin_page(child_id, true)?;
        }
        Ok(())
    }

    /// Rebalance the deepest node of the path after it underflowed.
    /// Merges recurse toward the root; the root itself collapses instead.
    fn coalesce_or_redistribute(&self, path: &mut WritePath) -> Result<()> {
        if path.entries.len() == 1 {
            return self.adjust_root(path);
        }

        let outcome = self.rebalance_with_sibling(path)?;
        match outcome {
            RebalanceOutcome::Redistributed => Ok(()),
            RebalanceOutcome::Merged { emptied } => {
                let popped = path.pop_dirty(&self.buffer_pool);
                if popped == emptied {
                    if let Err(e) = self.buffer_pool.delete_page(emptied) {
                        debug!("deferring delete of page {}: {}", emptied, e);
                    }
                }
                let parent_underflow = {
                    let (_, parent_guard) = path.entries.last().expect("merge left no parent");
                    node::size(parent_guard) < node::min_size(parent_guard)
                };
                if parent_underflow {
                    self.coalesce_or_redistribute(path)?;
                }
                Ok(())
            }
        }
    }

    /// One rebalancing round between the deepest node and a sibling. The
    /// sibling is the right neighbor only for the leftmost child, the
    /// left neighbor otherwise; merges always fold into the left page.
    fn rebalance_with_sibling(&self, path: &mut WritePath) -> Result<RebalanceOutcome> {
        let last = path.entries.len() - 1;
        let (upper, lower) = path.entries.split_at_mut(last);
        let (_, parent_guard) = upper.last_mut().expect("node without parent");
        let (node_id, node_guard) = &mut lower[0];

        let node_index = internal::value_index::<K>(parent_guard, *node_id);
        let node_is_leftmost = node_index == 0;
        let sibling_slot = if node_is_leftmost { 1 } else { node_index - 1 };
        let sibling_id = internal::value_at::<K>(parent_guard, sibling_slot);

        let sibling_ptr = self.buffer_pool.fetch_page(sibling_id)?;
        let mut sibling_guard = sibling_ptr.write_arc();
        let is_leaf = node::is_leaf(node_guard);

        if node::size(node_guard) + node::size(&sibling_guard) <= node::max_size(node_guard) {
            // Coalesce. Orient so the right page empties into the left.
            let (separator_slot, emptied) = if node_is_leftmost {
                (1, sibling_id)
            } else {
                (node_index, *node_id)
            };
            let moved = if is_leaf {
                if node_is_leftmost {
                    leaf::move_all_to::<K>(&mut sibling_guard, node_guard);
                } else {
                    leaf::move_all_to::<K>(node_guard, &mut sibling_guard);
                }
                Vec::new()
            } else {
                let separator = internal::key_at::<K>(parent_guard, separator_slot);
                if node_is_leftmost {
                    internal::move_all_to::<K>(&mut sibling_guard, node_guard, separator)
                } else {
                    internal::move_all_to::<K>(node_guard, &mut sibling_guard, separator)
                }
            };
            internal::remove_at::<K>(parent_guard, separator_slot);

            let survivor = if node_is_leftmost { *node_id } else { sibling_id };
            drop(sibling_guard);
            self.buffer_pool.unpin_page(sibling_id, true)?;
            if emptied == sibling_id {
                if let Err(e) = self.buffer_pool.delete_page(sibling_id) {
                    debug!("deferring delete of page {}: {}", sibling_id, e);
                }
            }
            self.reparent_children(path, &moved, survivor)?;
            Ok(RebalanceOutcome::Merged { emptied })
        } else {
            // Redistribute one entry across and fix the separator.
            let mut moved_child = None;
            if node_is_leftmost {
                if is_leaf {
                    leaf::move_first_to_end_of::<K>(&mut sibling_guard, node_guard);
                    let new_separator = leaf::key_at::<K>(&sibling_guard, 0);
                    internal::set_key_at::<K>(parent_guard, 1, new_separator);
                } else {
                    let separator = internal::key_at::<K>(parent_guard, 1);
                    let (new_separator, child) =
                        internal::move_first_to_end_of::<K>(&mut sibling_guard, node_guard, separator);
                    internal::set_key_at::<K>(parent_guard, 1, new_separator);
                    moved_child = Some((child, *node_id));
                }
            } else if is_leaf {
                leaf::move_last_to_front_of::<K>(&mut sibling_guard, node_guard);
                let new_separator = leaf::key_at::<K>(node_guard, 0);
                internal::set_key_at::<K>(parent_guard, node_index, new_separator);
            } else {
                let separator = internal::key_at::<K>(parent_guard, node_index);
                let (new_separator, child) =
                    internal::move_last_to_front_of::<K>(&mut sibling_guard, node_guard, separator);
                internal::set_key_at::<K>(parent_guard, node_index, new_separator);
                moved_child = Some((child, *node_id));
            }

            drop(sibling_guard);
            self.buffer_pool.unpin_page(sibling_id, true)?;
            if let Some((child, new_parent)) = moved_child {
                self.reparent_children(path, &[child], new_parent)?;
            }
            Ok(RebalanceOutcome::Redistributed)
        }
    }

    /// Shrink the root: an internal root with a single child hands the
    /// tree to that child; an emptied leaf root leaves the tree empty.
    fn adjust_root(&self, path: &mut WritePath) -> Result<()> {
        let (is_leaf, size) = {
            let (_, root_guard) = path.entries.last().expect("empty write path");
            (node::is_leaf(root_guard), node::size(root_guard))
        };

        if !is_leaf && size == 1 {
            let new_root_id = {
                let (_, root_guard) = path.entries.last().expect("empty write path");
                internal::value_at::<K>(root_guard, 0)
            };
            let child_ptr = self.buffer_pool.fetch_page(new_root_id)?;
            {
                let mut child_guard = child_ptr.write();
                node::set_parent_page_id(&mut child_guard, INVALID_PAGE_ID);
            }
            self.buffer_pool.unpin_page(new_root_id, true)?;
            self.update_root_page_id(new_root_id)?;

            let old_root = path.pop_dirty(&self.buffer_pool);
            if let Err(e) = self.buffer_pool.delete_page(old_root) {
                debug!("deferring delete of page {}: {}", old_root, e);
            }
        } else if is_leaf && size == 0 {
            self.update_root_page_id(INVALID_PAGE_ID)?;
            let old_root = path.pop_dirty(&self.buffer_pool);
            if let Err(e) = self.buffer_pool.delete_page(old_root) {
                debug!("deferring delete of page {}: {}", old_root, e);
            }
        }
        Ok(())
    }

    /// Recursive structural check; returns the (min, max) key range of
    /// the subtree.
    fn validate_node(&self, page_id: PageId, expected_parent: PageId) -> Result<(K, K)> {
        let ptr = self.buffer_pool.fetch_page(page_id)?;
        let guard = ptr.read();

        if node::parent_page_id(&guard) != expected_parent {
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false)?;
            return Err(BTreeError::Corrupt(format!(
                "page {} has a stale parent pointer",
                page_id
            )));
        }

        let size = node::size(&guard);
        let is_root = expected_parent == INVALID_PAGE_ID;
        let is_leaf = node::is_leaf(&guard);
        if size > node::max_size(&guard) || (!is_root && size < node::min_size(&guard)) {
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false)?;
            return Err(BTreeError::Corrupt(format!(
                "page {} occupancy {} outside bounds",
                page_id, size
            )));
        }

        let result = if is_leaf {
            let keys: Vec<K> = (0..size).map(|i| leaf::key_at::<K>(&guard, i)).collect();
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false)?;
            if keys.is_empty() {
                return Err(BTreeError::Corrupt(format!("leaf {} is empty", page_id)));
            }
            if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(BTreeError::Corrupt(format!(
                    "leaf {} keys out of order",
                    page_id
                )));
            }
            (keys[0], keys[size - 1])
        } else {
            let children: Vec<PageId> = (0..size)
                .map(|i| internal::value_at::<K>(&guard, i))
                .collect();
            let separators: Vec<K> = (1..size).map(|i| internal::key_at::<K>(&guard, i)).collect();
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false)?;

            if separators.windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(BTreeError::Corrupt(format!(
                    "internal {} separators out of order",
                    page_id
                )));
            }

            let mut low = None;
            let mut high = None;
            for (i, &child) in children.iter().enumerate() {
                let (child_min, child_max) = self.validate_node(child, page_id)?;
                if i > 0 {
                    // The separator equals the smallest key of the
                    // subtree it dominates.
                    if separators[i - 1] != child_min {
                        return Err(BTreeError::Corrupt(format!(
                            "internal {} separator {} does not match child minimum",
                            page_id, i
                        )));
                    }
                }
                if let Some(prev_max) = high {
                    if child_min <= prev_max {
                        return Err(BTreeError::Corrupt(format!(
                            "internal {} children overlap at slot {}",
                            page_id, i
                        )));
                    }
                }
                low.get_or_insert(child_min);
                high = Some(child_max);
            }
            (low.unwrap(), high.unwrap())
        };
        Ok(result)
    }

    /// The leaf chain must cover the whole key space in ascending order.
    fn validate_leaf_chain(&self) -> Result<()> {
        let (mut page_id, guard) = match self.find_leaf_read(None)? {
            Some(found) => found,
            None => return Ok(()),
        };
        drop(guard);
        self.buffer_pool.unpin_page(page_id, false)?;

        let mut previous: Option<K> = None;
        while page_id != INVALID_PAGE_ID {
            let ptr = self.buffer_pool.fetch_page(page_id)?;
            let guard = ptr.read();
            for i in 0..node::size(&guard) {
                let key = leaf::key_at::<K>(&guard, i);
                if let Some(prev) = previous {
                    if key <= prev {
                        drop(guard);
                        self.buffer_pool.unpin_page(page_id, false)?;
                        return Err(BTreeError::Corrupt(
                            "leaf chain out of key order".to_string(),
                        ));
                    }
                }
                previous = Some(key);
            }
            let next = leaf::next_page_id(&guard);
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false)?;
            page_id = next;
        }
        Ok(())
    }
}
