use thiserror::Error;
use crate::common::types::{FrameId, PageId};
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("Page {0} not found in buffer pool")]
    PageNotFound(PageId),

    #[error("Page {0} is pinned")]
    PagePinned(PageId),

    #[error("No frame available: free list empty and all pages pinned")]
    NoAvailableFrame,

    #[error("Frame {0} is out of replacer bounds")]
    FrameOutOfRange(FrameId),

    #[error("Frame {0} cannot be removed while it is not evictable")]
    FrameNotEvictable(FrameId),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),
}
