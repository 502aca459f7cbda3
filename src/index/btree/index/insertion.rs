use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::header::TreeHeader;
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode};
use crate::index::btree::serialization::{deserialize_node, serialize_node};
use crate::storage::buffer::page_guard::WritePageGuard;
use super::base::BTreeIndex;

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Insert a key-value pair. Returns false if the key already exists.
    ///
    /// Latch crabbing, top-down: the header's write guard and every
    /// ancestor's are dropped as soon as a visited internal page is
    /// insertion-safe (it can absorb a child split without splitting
    /// itself); everything still latched on reaching the leaf may have to
    /// change, and nothing else can.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let mut header_guard = self.buffer_pool.fetch_page_write(self.header_page_id)?;
        let root_id = TreeHeader::load(header_guard.page()).root_page_id;

        let root_id = if root_id == INVALID_PAGE_ID {
            let (new_root_id, basic) = self.buffer_pool.new_page()?;
            let mut root_guard = basic.upgrade_write();
            let root: LeafNode<K> = LeafNode::new(self.leaf_max_size);
            serialize_node(&BTreeNode::Leaf(root), root_guard.page_mut())?;
            TreeHeader {
                root_page_id: new_root_id,
            }
            .store(header_guard.page_mut());
            new_root_id
        } else {
            root_id
        };

        let mut header_guard = Some(header_guard);
        // ancestors still latched: (guard, page id, child slot we descended into)
        let mut path: Vec<(WritePageGuard, PageId, usize)> = Vec::new();

        let mut guard = self.buffer_pool.fetch_page_write(root_id)?;
        let mut page_id = root_id;

        let mut leaf = loop {
            match deserialize_node::<K>(guard.page())? {
                BTreeNode::Leaf(leaf) => break leaf,
                BTreeNode::Internal(inner) => {
                    if inner.is_insertion_safe() {
                        header_guard = None;
                        path.clear();
                    }
                    let idx = inner.child_index(&key);
                    let child_id = inner.children[idx];
                    path.push((guard, page_id, idx));
                    guard = self.buffer_pool.fetch_page_write(child_id)?;
                    page_id = child_id;
                }
            }
        };

        if !leaf.insert(key, rid) {
            return Ok(false);
        }

        // propagate splits back up while pages sit at their maximum
        let mut current = BTreeNode::Leaf(leaf);
        let mut current_guard = guard;
        let mut current_id = page_id;

        loop {
            if !current.needs_split() {
                serialize_node(&current, current_guard.page_mut())?;
                return Ok(true);
            }

            let (separator, right_id) = self.split_node(&mut current)?;
            serialize_node(&current, current_guard.page_mut())?;

            match path.pop() {
                Some((parent_guard, parent_id, _)) => {
                    let BTreeNode::Internal(mut parent) =
                        deserialize_node::<K>(parent_guard.page())?
                    else {
                        return Err(BTreeError::InvalidPageFormat);
                    };
                    parent.insert(separator, right_id);
                    current = BTreeNode::Internal(parent);
                    current_guard = parent_guard;
                    current_id = parent_id;
                }
                None => {
                    // the split reached the root; the header guard is still
                    // held, because no node on this path was safe
                    let mut header_guard = header_guard
                        .take()
                        .expect("root split implies the header guard was retained");

                    let (new_root_id, basic) = self.buffer_pool.new_page()?;
                    let mut new_root_guard = basic.upgrade_write();
                    let mut new_root: InternalNode<K> =
                        InternalNode::new(self.internal_max_size);
                    new_root.children.push(current_id);
                    new_root.insert(separator, right_id);
                    serialize_node(&BTreeNode::Internal(new_root), new_root_guard.page_mut())?;

                    TreeHeader {
                        root_page_id: new_root_id,
                    }
                    .store(header_guard.page_mut());

                    return Ok(true);
                }
            }
        }
    }

    /// Carve the upper half of a full page into a fresh right sibling,
    /// returning the separator to push into the parent and the new page id
    fn split_node(&self, node: &mut BTreeNode<K>) -> Result<(K, PageId), BTreeError> {
        let (right_id, basic) = self.buffer_pool.new_page()?;
        let mut right_guard = basic.upgrade_write();

        let (separator, right_node) = match node {
            BTreeNode::Leaf(leaf) => {
                let (separator, mut right) = leaf.split();
                right.next_page_id = leaf.next_page_id;
                leaf.next_page_id = right_id;
                (separator, BTreeNode::Leaf(right))
            }
            BTreeNode::Internal(inner) => {
                let (separator, right) = inner.split();
                (separator, BTreeNode::Internal(right))
            }
        };

        serialize_node(&right_node, right_guard.page_mut())?;
        Ok((separator, right_id))
    }
}
