use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Page size in bytes (8KB)
pub const PAGE_SIZE: usize = 8192;

/// Page ID type
pub type PageId = u32;

/// Sentinel for "no page". Valid page ids start at 1.
pub const INVALID_PAGE_ID: PageId = 0;

/// Transaction ID type
pub type TxnId = u32;

/// Table OID type
pub type TableOid = u32;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// Record ID: the physical address of a tuple as (page, slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// Zero the page contents, keeping the id.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }
}

/// Smart pointer to a page; the RwLock doubles as the page latch
pub type PagePtr = Arc<RwLock<Page>>;
