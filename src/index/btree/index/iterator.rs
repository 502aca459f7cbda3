use std::sync::Arc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, LeafNode};
use crate::index::btree::serialization::deserialize_node;
use crate::storage::buffer::page_guard::ReadPageGuard;
use crate::storage::buffer::BufferPoolManager;
use super::base::BTreeIndex;

/// Forward scan over the leaf chain in key order.
///
/// Holds a read guard on the current leaf, so the visited page can neither
/// be evicted nor modified underneath the scan; crossing to the next leaf
/// latches it before the current one is released. The iterator is a
/// snapshot of nothing more than the pages it walks: callers that need a
/// stable view across the whole range must hold transactional locks above
/// this layer.
pub struct TreeIterator<K> {
    buffer_pool: Arc<BufferPoolManager>,
    position: Option<LeafPosition<K>>,
}

struct LeafPosition<K> {
    // pins and latches the leaf the decoded copy came from
    _guard: ReadPageGuard,
    leaf: LeafNode<K>,
    index: usize,
}

impl<K> TreeIterator<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        start: Option<(ReadPageGuard, usize)>,
    ) -> Result<Self, BTreeError> {
        let position = match start {
            Some((guard, index)) => {
                let BTreeNode::Leaf(leaf) = deserialize_node::<K>(guard.page())? else {
                    return Err(BTreeError::InvalidPageFormat);
                };
                Some(LeafPosition {
                    _guard: guard,
                    leaf,
                    index,
                })
            }
            None => None,
        };

        Ok(Self {
            buffer_pool,
            position,
        })
    }
}

impl<K> Iterator for TreeIterator<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let position = self.position.as_mut()?;

            if position.index < position.leaf.entries.len() {
                let entry = position.leaf.entries[position.index].clone();
                position.index += 1;
                return Some(entry);
            }

            let next_id = position.leaf.next_page_id;
            if next_id == INVALID_PAGE_ID {
                self.position = None;
                return None;
            }

            // latch the successor before the current leaf is released
            let Ok(guard) = self.buffer_pool.fetch_page_read(next_id) else {
                self.position = None;
                return None;
            };
            let Ok(BTreeNode::Leaf(leaf)) = deserialize_node::<K>(guard.page()) else {
                self.position = None;
                return None;
            };
            self.position = Some(LeafPosition {
                _guard: guard,
                leaf,
                index: 0,
            });
        }
    }
}

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Iterate the whole tree in ascending key order
    pub fn iter(&self) -> Result<TreeIterator<K>, BTreeError> {
        let start = self.find_leftmost_leaf()?.map(|guard| (guard, 0));
        TreeIterator::new(self.buffer_pool.clone(), start)
    }

    /// Iterate starting at `key`; the empty iterator if the key is absent
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K>, BTreeError> {
        let Some(guard) = self.find_leaf_read(key)? else {
            return TreeIterator::new(self.buffer_pool.clone(), None);
        };

        let BTreeNode::Leaf(leaf) = deserialize_node::<K>(guard.page())? else {
            return Err(BTreeError::InvalidPageFormat);
        };

        match leaf.entries.binary_search_by(|(k, _)| k.cmp(key)) {
            Ok(index) => TreeIterator::new(self.buffer_pool.clone(), Some((guard, index))),
            Err(_) => TreeIterator::new(self.buffer_pool.clone(), None),
        }
    }
}
