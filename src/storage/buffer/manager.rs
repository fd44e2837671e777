use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::common::config::StorageConfig;
use crate::common::types::{
    FrameId, Lsn, Page, PageId, PagePtr, INVALID_LSN, INVALID_PAGE_ID,
};
use crate::storage::buffer::error::{BufferPoolError, Result};
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;
use crate::transaction::wal::log_manager::LogManager;

/// Bookkeeping for one frame. Lives under the pool mutex; the page
/// payload itself is latched separately by callers.
#[derive(Debug, Clone, Copy)]
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn empty() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

/// State serialized by the pool-wide mutex: the page table, the free
/// list, the replacer, and all frame metadata.
struct PoolCore {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
    frames: Vec<FrameMeta>,
}

/// Fixed pool of frames caching disk pages. Every operation runs under a
/// single pool mutex; payload access goes through the per-page latch on
/// the handed-out `PagePtr`.
///
/// When a log manager is attached, a dirty page whose LSN is past the
/// durable LSN forces a synchronous log flush before it is written back,
/// which is what makes the log write-ahead.
pub struct BufferPoolManager {
    pool_size: usize,
    pages: Vec<PagePtr>,
    core: Mutex<PoolCore>,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    /// Convenience constructor: owns a fresh disk manager, logging
    /// disabled. This is the shape tests use.
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, pool_size, disk_manager, None))
    }

    /// Construct from the engine-wide configuration knobs.
    pub fn with_config(
        config: &StorageConfig,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        Self::with_disk_manager(config.pool_size, config.bucket_size, disk_manager, log_manager)
    }

    /// Full constructor over a shared disk manager. Passing `None` for the
    /// log manager disables logging entirely.
    pub fn with_disk_manager(
        pool_size: usize,
        bucket_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let mut pages = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            pages.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            pages,
            core: Mutex::new(PoolCore {
                page_table: HashMap::with_capacity(bucket_size),
                free_list,
                replacer: LruReplacer::new(),
                frames: vec![FrameMeta::empty(); pool_size],
            }),
            disk_manager,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Fetch a page, reading it from disk if it is not resident. The page
    /// comes back pinned; the caller must `unpin_page` when done.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page".to_string(),
            ));
        }

        let mut core = self.core.lock();

        if let Some(&frame_id) = core.page_table.get(&page_id) {
            core.replacer.erase(frame_id);
            core.frames[frame_id].pin_count += 1;
            return Ok(self.pages[frame_id].clone());
        }

        let frame_id = self.allocate_frame(&mut core)?;
        {
            let mut page = self.pages[frame_id].write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page) {
                page.reset();
                core.frames[frame_id] = FrameMeta::empty();
                core.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        core.frames[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };
        core.page_table.insert(page_id, frame_id);
        Ok(self.pages[frame_id].clone())
    }

    /// Allocate a fresh page on disk and install it, zero-filled, in a
    /// frame. The frame starts dirty and pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId)> {
        let mut core = self.core.lock();

        let frame_id = self.allocate_frame(&mut core)?;
        let page_id = match self.disk_manager.allocate_page() {
            Ok(id) => id,
            Err(e) => {
                core.free_list.push_back(frame_id);
                return Err(e.into());
            }
        };

        {
            let mut page = self.pages[frame_id].write();
            page.reset();
            page.id = page_id;
        }

        core.frames[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: true,
        };
        core.page_table.insert(page_id, frame_id);
        Ok((self.pages[frame_id].clone(), page_id))
    }

    /// Drop one pin. The dirty flag is a one-way door: unpinning clean
    /// never clears a previous dirty mark. A frame whose pin count reaches
    /// zero becomes a replacement candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<()> {
        let mut core = self.core.lock();
        let frame_id = match core.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let meta = &mut core.frames[frame_id];
        if meta.pin_count == 0 {
            return Err(BufferPoolError::InvalidOperation(format!(
                "page {} is not pinned",
                page_id
            )));
        }
        meta.pin_count -= 1;
        if is_dirty {
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            core.replacer.insert(frame_id);
        }
        Ok(())
    }

    /// Write a resident page back to disk and clear its dirty bit.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let mut core = self.core.lock();
        let frame_id = match core.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };
        self.flush_frame(&mut core, frame_id)
    }

    /// Flush every resident page. Used at clean shutdown.
    pub fn flush_all_pages(&self) -> Result<()> {
        let mut core = self.core.lock();
        let frame_ids: Vec<FrameId> = core.page_table.values().copied().collect();
        for frame_id in frame_ids {
            self.flush_frame(&mut core, frame_id)?;
        }
        Ok(())
    }

    /// Remove a page from the pool and tombstone it on disk. Fails while
    /// the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut core = self.core.lock();
        if let Some(&frame_id) = core.page_table.get(&page_id) {
            if core.frames[frame_id].pin_count > 0 {
                return Err(BufferPoolError::PagePinned(page_id));
            }
            core.page_table.remove(&page_id);
            core.replacer.erase(frame_id);
            self.pages[frame_id].write().reset();
            core.frames[frame_id] = FrameMeta::empty();
            core.free_list.push_back(frame_id);
        }
        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    /// Number of frames currently holding a pinned page. Quiescent
    /// callers expect zero.
    pub fn pinned_page_count(&self) -> usize {
        let core = self.core.lock();
        core.frames.iter().filter(|m| m.pin_count > 0).count()
    }

    fn flush_frame(&self, core: &mut PoolCore, frame_id: FrameId) -> Result<()> {
        if !core.frames[frame_id].is_dirty {
            return Ok(());
        }
        let page = self.pages[frame_id].read();
        self.wait_for_log_durability(page.lsn());
        self.disk_manager.write_page(&page)?;
        drop(page);
        core.frames[frame_id].is_dirty = false;
        Ok(())
    }

    /// Pick a frame for a new resident page: free list first, then a
    /// replacer victim, writing back the victim if dirty.
    fn allocate_frame(&self, core: &mut PoolCore) -> Result<FrameId> {
        if let Some(frame_id) = core.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = match core.replacer.victim() {
            Some(id) => id,
            None => return Err(BufferPoolError::BufferPoolFull),
        };
        let meta = core.frames[frame_id];
        debug_assert_eq!(meta.pin_count, 0);

        if meta.is_dirty {
            let page = self.pages[frame_id].read();
            self.wait_for_log_durability(page.lsn());
            if let Err(e) = self.disk_manager.write_page(&page) {
                drop(page);
                core.replacer.insert(frame_id);
                return Err(e.into());
            }
        }
        core.page_table.remove(&meta.page_id);
        core.frames[frame_id] = FrameMeta::empty();
        Ok(frame_id)
    }

    /// The write-ahead rule: a page may hit disk only after every log
    /// record up to its LSN is durable.
    fn wait_for_log_durability(&self, page_lsn: Lsn) {
        if page_lsn == INVALID_LSN {
            return;
        }
        if let Some(log_manager) = &self.log_manager {
            if log_manager.persistent_lsn() < page_lsn {
                log_manager.flush_until(page_lsn);
            }
        }
    }
}
