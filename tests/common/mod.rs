use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use onegadb::common::types::PageId;
use onegadb::index::btree::BTreeIndex;
use onegadb::storage::buffer::BufferPoolManager;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, 2, path)?);
    Ok((buffer_pool, file))
}

// Create a B+Tree over a fresh buffer pool; the header page is allocated
// first so it gets a stable id
#[allow(dead_code)]
pub fn create_test_btree(
    pool_size: usize,
    leaf_max: usize,
    internal_max: usize,
) -> Result<(BTreeIndex<i32>, Arc<BufferPoolManager>, NamedTempFile)> {
    let (buffer_pool, file) = create_test_buffer_pool(pool_size)?;
    let header_page_id = allocate_page(&buffer_pool)?;
    let btree = BTreeIndex::new(buffer_pool.clone(), header_page_id, leaf_max, internal_max)?;
    Ok((btree, buffer_pool, file))
}

// Allocate a page and immediately unpin it
#[allow(dead_code)]
pub fn allocate_page(buffer_pool: &Arc<BufferPoolManager>) -> Result<PageId> {
    let (page_id, guard) = buffer_pool.new_page()?;
    drop(guard);
    Ok(page_id)
}
