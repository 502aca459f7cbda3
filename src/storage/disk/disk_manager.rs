use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles the actual page I/O against the database file.
///
/// Page ids are allocated monotonically by extending the file; id 0 is the
/// invalid sentinel, so page `n` lives at byte offset `(n - 1) * PAGE_SIZE`.
pub struct DiskManager {
    db_file: Mutex<File>,
    num_writes: AtomicU64,
}

impl DiskManager {
    /// Open (or create) the database file at the given path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        Ok(Self {
            db_file: Mutex::new(file),
            num_writes: AtomicU64::new(0),
        })
    }

    /// Read a page from disk into the provided buffer
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = self.page_offset(page_id);
        let mut buffer = [0u8; PAGE_SIZE];

        {
            let mut file = self.db_file.lock();

            let file_size = file.metadata()?.len();

            // Reads past EOF see a fresh zeroed page
            if offset as u64 >= file_size {
                page.page_id = page_id;
                page.reset();
                return Ok(());
            }

            file.seek(SeekFrom::Start(offset as u64))?;
            file.read_exact(&mut buffer)?;
        }

        page.data.copy_from_slice(&buffer);
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = self.page_offset(page.page_id);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&page.data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    /// Allocate a new page on disk and return its ID
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();

        // First page is 1, not 0
        let new_page_id = (file_size / PAGE_SIZE as u64) as PageId + 1;

        // Extend the file with a zeroed page
        file.seek(SeekFrom::End(0))?;
        let zeros = [0u8; PAGE_SIZE];
        file.write_all(&zeros)?;
        file.flush()?;

        Ok(new_page_id)
    }

    /// Release a page on disk. The file is never shrunk and freed ids are not
    /// recycled; a production allocator would track a free-page bitmap here.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Number of page writes issued since this manager was opened
    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::SeqCst)
    }

    /// Calculate the offset of a page in the file
    fn page_offset(&self, page_id: PageId) -> usize {
        (page_id as usize - 1) * PAGE_SIZE
    }
}
