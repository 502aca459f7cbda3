use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId};

/// The tree's header page payload: a single field naming the current root
/// (or `INVALID_PAGE_ID` while the tree is empty). Mutated only under the
/// header page's write latch.
#[derive(Debug, Clone, Copy)]
pub struct TreeHeader {
    pub root_page_id: PageId,
}

impl TreeHeader {
    pub fn load(page: &Page) -> Self {
        Self {
            root_page_id: LittleEndian::read_u32(&page.data[0..4]),
        }
    }

    pub fn store(&self, page: &mut Page) {
        LittleEndian::write_u32(&mut page.data[0..4], self.root_page_id);
    }
}
