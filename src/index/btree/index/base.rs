use std::marker::PhantomData;
use std::sync::Arc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::header::TreeHeader;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::deserialize_node;
use crate::storage::buffer::page_guard::ReadPageGuard;
use crate::storage::buffer::BufferPoolManager;

/// Order-preserving, leaf-linked B+Tree built over buffer-pool page guards.
///
/// All tree state lives in pages: the header page names the root, internal
/// pages route by separator keys, leaves chain left-to-right. The struct
/// itself is just configuration, so it can be shared freely across threads;
/// writers coordinate through page latches alone.
pub struct BTreeIndex<K> {
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) header_page_id: PageId,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    pub(crate) _phantom: PhantomData<K>,
}

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a fresh tree over the given header page, resetting its root
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        header_page_id: PageId,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 2, "leaf pages need at least two slots");
        assert!(
            internal_max_size >= 3,
            "internal pages need room for two separators after a split"
        );

        {
            let mut header_guard = buffer_pool.fetch_page_write(header_page_id)?;
            TreeHeader {
                root_page_id: INVALID_PAGE_ID,
            }
            .store(header_guard.page_mut());
        }

        Ok(Self {
            buffer_pool,
            header_page_id,
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    /// Attach to a tree previously built on this header page
    pub fn open(
        buffer_pool: Arc<BufferPoolManager>,
        header_page_id: PageId,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        Self {
            buffer_pool,
            header_page_id,
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        }
    }

    /// Page id of the current root, or `INVALID_PAGE_ID` for an empty tree
    pub fn root_page_id(&self) -> Result<PageId, BTreeError> {
        let guard = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        Ok(TreeHeader::load(guard.page()).root_page_id)
    }

    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        Ok(self.root_page_id()? == INVALID_PAGE_ID)
    }

    /// Point lookup
    pub fn get(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let Some(guard) = self.find_leaf_read(key)? else {
            return Ok(None);
        };

        match deserialize_node::<K>(guard.page())? {
            BTreeNode::Leaf(leaf) => Ok(leaf.lookup(key)),
            BTreeNode::Internal(_) => Err(BTreeError::InvalidPageFormat),
        }
    }

    /// Descend to the leaf that may contain `key`, holding only read latches.
    /// Each parent latch is dropped as soon as the child's is acquired; pure
    /// readers never need to crab more than one level.
    pub(crate) fn find_leaf_read(&self, key: &K) -> Result<Option<ReadPageGuard>, BTreeError> {
        let header_guard = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let root_id = TreeHeader::load(header_guard.page()).root_page_id;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.buffer_pool.fetch_page_read(root_id)?;
        drop(header_guard);

        loop {
            let next = match deserialize_node::<K>(guard.page())? {
                BTreeNode::Leaf(_) => return Ok(Some(guard)),
                BTreeNode::Internal(inner) => inner.children[inner.child_index(key)],
            };
            // assigning acquires the child latch before the parent drops
            guard = self.buffer_pool.fetch_page_read(next)?;
        }
    }

    /// Descend to the leftmost leaf under read latches
    pub(crate) fn find_leftmost_leaf(&self) -> Result<Option<ReadPageGuard>, BTreeError> {
        let header_guard = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let root_id = TreeHeader::load(header_guard.page()).root_page_id;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.buffer_pool.fetch_page_read(root_id)?;
        drop(header_guard);

        loop {
            let next = match deserialize_node::<K>(guard.page())? {
                BTreeNode::Leaf(_) => return Ok(Some(guard)),
                BTreeNode::Internal(inner) => inner.children[0],
            };
            guard = self.buffer_pool.fetch_page_read(next)?;
        }
    }
}
