use anyhow::Result;

use onegadb::storage::buffer::BufferPoolError;

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page_id, guard) = buffer_pool.new_page()?;

    // Page IDs start at 1
    assert!(page_id > 0);
    guard.with_page(|page| {
        assert_eq!(page.page_id, page_id);
    });

    Ok(())
}

#[test]
fn test_fetch_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page_id, guard) = buffer_pool.new_page()?;
    drop(guard);

    let fetched = buffer_pool.fetch_page_read(page_id)?;
    assert_eq!(fetched.page().page_id, page_id);

    Ok(())
}

#[test]
fn test_page_modification_survives_guard() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page_id, guard) = buffer_pool.new_page()?;
    {
        let mut write_guard = guard.upgrade_write();
        let data = write_guard.data_mut();
        data[100..109].copy_from_slice(b"Test Data");
    }

    let fetched = buffer_pool.fetch_page_read(page_id)?;
    assert_eq!(&fetched.data()[100..109], b"Test Data");

    Ok(())
}

#[test]
fn test_eviction_writes_back_dirty_page() -> Result<()> {
    // Pool of one frame: the second new_page must evict the first
    let (buffer_pool, _temp_file) = create_test_buffer_pool(1)?;

    let (first_id, guard) = buffer_pool.new_page()?;
    {
        let mut write_guard = guard.upgrade_write();
        write_guard.data_mut()[0..5].copy_from_slice(b"hello");
    }

    let writes_before = buffer_pool.disk_manager().num_writes();
    let (second_id, guard) = buffer_pool.new_page()?;
    assert_ne!(first_id, second_id);

    // exactly one write-back for the evicted dirty page
    assert_eq!(buffer_pool.disk_manager().num_writes(), writes_before + 1);
    drop(guard);

    // the first page comes back from disk intact
    let fetched = buffer_pool.fetch_page_read(first_id)?;
    assert_eq!(&fetched.data()[0..5], b"hello");

    Ok(())
}

#[test]
fn test_clean_eviction_skips_write_back() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(1)?;

    let (_first_id, guard) = buffer_pool.new_page()?;
    drop(guard); // never dirtied

    let writes_before = buffer_pool.disk_manager().num_writes();
    let (_second_id, _guard) = buffer_pool.new_page()?;

    assert_eq!(buffer_pool.disk_manager().num_writes(), writes_before);

    Ok(())
}

#[test]
fn test_pool_exhaustion() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    // hold pins on every frame
    let mut guards = Vec::new();
    for _ in 0..3 {
        guards.push(buffer_pool.new_page()?);
    }

    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::NoAvailableFrame)
    ));

    // releasing one pin frees a frame for the next allocation
    guards.pop();
    assert!(buffer_pool.new_page().is_ok());

    Ok(())
}

#[test]
fn test_unpin_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page_id, guard) = buffer_pool.new_page()?;
    drop(guard); // guard drop performs the unpin

    // pin count is already zero
    assert!(!buffer_pool.unpin_page(page_id, false));
    // and unknown pages report false
    assert!(!buffer_pool.unpin_page(9999, false));

    Ok(())
}

#[test]
fn test_flush_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page_id, guard) = buffer_pool.new_page()?;
    {
        let mut write_guard = guard.upgrade_write();
        write_guard.data_mut()[10..14].copy_from_slice(b"sync");
    }

    let writes_before = buffer_pool.disk_manager().num_writes();
    buffer_pool.flush_page(page_id)?;
    assert_eq!(buffer_pool.disk_manager().num_writes(), writes_before + 1);

    // flush is unconditional: a clean page is written again
    buffer_pool.flush_page(page_id)?;
    assert_eq!(buffer_pool.disk_manager().num_writes(), writes_before + 2);

    assert!(matches!(
        buffer_pool.flush_page(9999),
        Err(BufferPoolError::PageNotFound(9999))
    ));

    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let mut page_ids = Vec::new();
    for i in 0..5u8 {
        let (page_id, guard) = buffer_pool.new_page()?;
        let mut write_guard = guard.upgrade_write();
        write_guard.data_mut()[0] = i;
        page_ids.push(page_id);
    }

    buffer_pool.flush_all_pages()?;

    for (i, &page_id) in page_ids.iter().enumerate() {
        let fetched = buffer_pool.fetch_page_read(page_id)?;
        assert_eq!(fetched.data()[0], i as u8);
    }

    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page_id, guard) = buffer_pool.new_page()?;

    // pinned pages cannot be deleted
    assert!(matches!(
        buffer_pool.delete_page(page_id),
        Err(BufferPoolError::PagePinned(_))
    ));

    drop(guard);
    buffer_pool.delete_page(page_id)?;

    // deleting an absent page succeeds quietly
    buffer_pool.delete_page(page_id)?;

    Ok(())
}
