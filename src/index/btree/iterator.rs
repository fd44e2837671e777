//! Leaf-chain iterator. Holds a pin on one leaf at a time and walks the
//! next-leaf pointers; entries are read under short page latches rather
//! than a latch held across calls, so a parked iterator never blocks a
//! writer.

use std::marker::PhantomData;
use std::sync::Arc;

use log::warn;

use crate::common::types::{PageId, PagePtr, Rid, INVALID_PAGE_ID};
use crate::index::btree::codec::KeyCodec;
use crate::index::btree::error::Result;
use crate::index::btree::node;
use crate::index::btree::leaf;
use crate::storage::buffer::BufferPoolManager;

pub struct TreeIterator<K: KeyCodec> {
    buffer_pool: Arc<BufferPoolManager>,
    page: Option<PagePtr>,
    page_id: PageId,
    index: usize,
    _marker: PhantomData<K>,
}

impl<K: KeyCodec> TreeIterator<K> {
    /// Build an iterator over a pinned leaf. The pin transfers to the
    /// iterator; it is released on drop or when the chain is exhausted.
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        page: PagePtr,
        page_id: PageId,
        index: usize,
    ) -> Result<Self> {
        let mut iterator = Self {
            buffer_pool,
            page: Some(page),
            page_id,
            index,
            _marker: PhantomData,
        };
        iterator.skip_exhausted_leaves()?;
        Ok(iterator)
    }

    /// The end-of-scan iterator.
    pub(crate) fn end(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            page: None,
            page_id: INVALID_PAGE_ID,
            index: 0,
            _marker: PhantomData,
        }
    }

    /// True once the cursor sits past the last entry of the last leaf.
    pub fn is_end(&self) -> bool {
        match &self.page {
            None => true,
            Some(page) => self.index >= node::size(&page.read()),
        }
    }

    /// The entry under the cursor.
    pub fn current(&self) -> Option<(K, Rid)> {
        let page = self.page.as_ref()?;
        let guard = page.read();
        if self.index >= node::size(&guard) {
            return None;
        }
        Some((
            leaf::key_at::<K>(&guard, self.index),
            leaf::value_at::<K>(&guard, self.index),
        ))
    }

    /// Step to the next entry, hopping leaves through the next pointer.
    pub fn advance(&mut self) -> Result<()> {
        if self.page.is_none() {
            return Ok(());
        }
        self.index += 1;
        self.skip_exhausted_leaves()
    }

    /// Move to the next leaf while the cursor is past the current leaf's
    /// entries. Parks at the tail of the last leaf.
    fn skip_exhausted_leaves(&mut self) -> Result<()> {
        loop {
            let (size, next) = match &self.page {
                None => return Ok(()),
                Some(page) => {
                    let guard = page.read();
                    (node::size(&guard), leaf::next_page_id(&guard))
                }
            };
            if self.index < size || next == INVALID_PAGE_ID {
                return Ok(());
            }

            self.release_page();
            let ptr = self.buffer_pool.fetch_page(next)?;
            self.page = Some(ptr);
            self.page_id = next;
            self.index = 0;
        }
    }

    fn release_page(&mut self) {
        if self.page.take().is_some() {
            let _ = self.buffer_pool.unpin_page(self.page_id, false);
            self.page_id = INVALID_PAGE_ID;
        }
    }
}

impl<K: KeyCodec> Iterator for TreeIterator<K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.current()?;
        if let Err(e) = self.advance() {
            warn!("index scan stopped early: {}", e);
            self.release_page();
        }
        Some(entry)
    }
}

impl<K: KeyCodec> Drop for TreeIterator<K> {
    fn drop(&mut self) {
        self.release_page();
    }
}
