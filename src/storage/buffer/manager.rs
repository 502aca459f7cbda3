use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

/// Bookkeeping for one frame, valid only under the pool mutex
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn new() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

/// All mutable pool state sits behind one mutex so the conservation
/// invariant (free + pinned + evictable == pool_size) is easy to maintain.
/// Page *contents* are protected separately by each frame's RwLock, which is
/// also the page latch handed out through guards.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
    metas: Vec<FrameMeta>,
}

/// Buffer pool manager: owns the in-memory frame array, maps pages to
/// frames, and vends page guards that couple pinning with latching.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<PagePtr>,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, replacer_k, disk_manager))
    }

    pub fn with_disk_manager(
        pool_size: usize,
        replacer_k: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut metas = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            frames.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            metas.push(FrameMeta::new());
            free_list.push_back(i as FrameId);
        }

        Self {
            pool_size,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                replacer: LruKReplacer::new(pool_size, replacer_k),
                metas,
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Allocate a brand-new page and pin it in a frame
    pub fn new_page(self: &Arc<Self>) -> Result<(PageId, BasicPageGuard), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = match self.disk_manager.allocate_page() {
            Ok(id) => id,
            Err(e) => {
                // hand the frame back so the allocation failure leaks nothing
                state.metas[frame_id as usize].page_id = INVALID_PAGE_ID;
                state.free_list.push_back(frame_id);
                return Err(e.into());
            }
        };

        {
            let mut page = self.frames[frame_id as usize].write();
            page.page_id = page_id;
            page.reset();
        }

        let meta = &mut state.metas[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id)?;
        state.replacer.set_evictable(frame_id, false);

        let page = self.frames[frame_id as usize].clone();
        Ok((page_id, BasicPageGuard::new(self.clone(), page, page_id)))
    }

    /// Pin a page, reading it from disk if it is not resident
    pub fn fetch_page_basic(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<BasicPageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(BasicPageGuard::new(self.clone(), page, page_id))
    }

    /// Pin a page and take its shared latch
    pub fn fetch_page_read(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<ReadPageGuard, BufferPoolError> {
        // The latch is taken after the pool mutex is released; the pin keeps
        // the frame from being recycled in between.
        Ok(self.fetch_page_basic(page_id)?.upgrade_read())
    }

    /// Pin a page and take its exclusive latch
    pub fn fetch_page_write(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<WritePageGuard, BufferPoolError> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_write())
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::PageNotFound(page_id));
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.metas[frame_id as usize].pin_count += 1;
            state.replacer.record_access(frame_id)?;
            state.replacer.set_evictable(frame_id, false);
            return Ok(self.frames[frame_id as usize].clone());
        }

        let frame_id = self.acquire_frame(&mut state)?;

        {
            let mut page = self.frames[frame_id as usize].write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page) {
                // hand the frame back so the failed read leaks nothing
                drop(page);
                state.metas[frame_id as usize].page_id = INVALID_PAGE_ID;
                state.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        let meta = &mut state.metas[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id)?;
        state.replacer.set_evictable(frame_id, false);

        Ok(self.frames[frame_id as usize].clone())
    }

    /// Drop one pin on a page, ORing in the caller's dirty flag.
    /// Returns false if the page is not resident or was already unpinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let meta = &mut state.metas[frame_id as usize];
        if meta.pin_count == 0 {
            return false;
        }

        meta.pin_count -= 1;
        meta.is_dirty |= is_dirty;

        if meta.pin_count == 0 {
            state.replacer.set_evictable(frame_id, true);
        }

        true
    }

    /// Write a page to disk unconditionally and clear its dirty bit.
    ///
    /// The page latch is taken only after the pool mutex is released: a
    /// thread may legally hold this page's write latch while waiting on the
    /// pool mutex, so latching under the mutex could deadlock. A temporary
    /// pin keeps the frame from being recycled in between.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let page = {
            let mut state = self.state.lock();
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                return Err(BufferPoolError::PageNotFound(page_id));
            };
            state.metas[frame_id as usize].pin_count += 1;
            state.replacer.set_evictable(frame_id, false);
            self.frames[frame_id as usize].clone()
        };

        let result = {
            let page = page.read();
            self.disk_manager.write_page(&page)
        };

        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            if result.is_ok() {
                state.metas[frame_id as usize].is_dirty = false;
            }
            let meta = &mut state.metas[frame_id as usize];
            meta.pin_count -= 1;
            if meta.pin_count == 0 {
                state.replacer.set_evictable(frame_id, true);
            }
        }

        result.map_err(Into::into)
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let page_ids: Vec<PageId> = {
            let state = self.state.lock();
            state.page_table.keys().copied().collect()
        };
        for page_id in page_ids {
            match self.flush_page(page_id) {
                // a page evicted in between was already written back
                Err(BufferPoolError::PageNotFound(_)) => {}
                other => other?,
            }
        }
        Ok(())
    }

    /// Drop a page from the pool and release its disk allocation.
    /// Ok for pages that are not resident; pinned pages are refused.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            self.disk_manager.deallocate_page(page_id);
            return Ok(());
        };

        if state.metas[frame_id as usize].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id)?;

        let meta = &mut state.metas[frame_id as usize];
        meta.page_id = INVALID_PAGE_ID;
        meta.is_dirty = false;

        {
            let mut page = self.frames[frame_id as usize].write();
            page.page_id = INVALID_PAGE_ID;
            page.reset();
        }

        state.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);

        Ok(())
    }

    /// Pick a frame for reuse: free list first, then the replacer's victim.
    /// A victim holding a dirty page is written back exactly once, and its
    /// page-table entry is removed before the frame is handed out.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = state.replacer.evict() else {
            return Err(BufferPoolError::NoAvailableFrame);
        };

        let old_page_id = state.metas[frame_id as usize].page_id;
        if state.metas[frame_id as usize].is_dirty {
            debug!("evicting dirty page {} from frame {}", old_page_id, frame_id);
            let result = {
                let page = self.frames[frame_id as usize].read();
                self.disk_manager.write_page(&page)
            };
            if let Err(e) = result {
                // the page stays resident and evictable; nothing was lost
                state.replacer.record_access(frame_id)?;
                state.replacer.set_evictable(frame_id, true);
                return Err(e.into());
            }
            state.metas[frame_id as usize].is_dirty = false;
        }

        if old_page_id != INVALID_PAGE_ID {
            state.page_table.remove(&old_page_id);
        }

        Ok(frame_id)
    }
}
