use std::sync::Arc;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::common::types::{Page, PageId, PagePtr};
use crate::storage::buffer::manager::BufferPoolManager;

/// Scoped pin on a buffer-pool page.
///
/// While a guard is alive the page cannot be evicted. Dropping the guard
/// unpins the page, passing along the dirty flag accumulated by the caller.
/// Ownership is move-only; the pin travels with the guard.
pub struct BasicPageGuard {
    bpm: Arc<BufferPoolManager>,
    page: PagePtr,
    page_id: PageId,
    is_dirty: bool,
}

impl BasicPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId) -> Self {
        Self {
            bpm,
            page,
            page_id,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Mark the page dirty so the unpin on drop reports the modification
    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Run a closure against the page contents under a short shared latch
    pub fn with_page<R>(&self, f: impl FnOnce(&Page) -> R) -> R {
        let page = self.page.read();
        f(&page)
    }

    /// Run a closure against the page contents under a short exclusive latch,
    /// marking the page dirty
    pub fn with_page_mut<R>(&mut self, f: impl FnOnce(&mut Page) -> R) -> R {
        self.is_dirty = true;
        let mut page = self.page.write();
        f(&mut page)
    }

    /// Take the shared latch, turning this pin into a read guard
    pub fn upgrade_read(self) -> ReadPageGuard {
        let latch = self.page.read_arc();
        ReadPageGuard {
            latch: Some(latch),
            guard: self,
        }
    }

    /// Take the exclusive latch, turning this pin into a write guard
    pub fn upgrade_write(self) -> WritePageGuard {
        let latch = self.page.write_arc();
        WritePageGuard {
            latch: Some(latch),
            guard: self,
        }
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

/// Pin plus shared page latch.
///
/// The latch field precedes the pin so the latch is always released before
/// the unpin runs; a waiter woken on the latch must still find the page
/// resident.
pub struct ReadPageGuard {
    latch: Option<ArcRwLockReadGuard<RawRwLock, Page>>,
    guard: BasicPageGuard,
}

impl ReadPageGuard {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id
    }

    pub fn page(&self) -> &Page {
        self.latch.as_ref().expect("read guard holds its latch")
    }

    pub fn data(&self) -> &[u8] {
        &self.page().data
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // latch first, then the BasicPageGuard field unpins
        self.latch.take();
    }
}

/// Pin plus exclusive page latch. Mutable access marks the page dirty.
pub struct WritePageGuard {
    latch: Option<ArcRwLockWriteGuard<RawRwLock, Page>>,
    guard: BasicPageGuard,
}

impl WritePageGuard {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id
    }

    pub fn page(&self) -> &Page {
        self.latch.as_ref().expect("write guard holds its latch")
    }

    pub fn page_mut(&mut self) -> &mut Page {
        self.guard.is_dirty = true;
        self.latch.as_mut().expect("write guard holds its latch")
    }

    pub fn data(&self) -> &[u8] {
        &self.page().data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.page_mut().data
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.latch.take();
    }
}
