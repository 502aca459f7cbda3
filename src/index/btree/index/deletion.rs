use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::header::TreeHeader;
use crate::index::btree::node::{BTreeNode, InternalNode};
use crate::index::btree::serialization::{deserialize_node, serialize_node};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_guard::WritePageGuard;
use super::base::BTreeIndex;

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Remove a key. Removing an absent key is a no-op.
    ///
    /// Mirrors insert's crabbing: ancestors are released once a visited
    /// internal page is deletion-safe (it can lose a separator to a child
    /// merge without underflowing). Underflow on the way back up is repaired
    /// by stealing from a sibling when possible, else by merging into it.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let header_guard = self.buffer_pool.fetch_page_write(self.header_page_id)?;
        let root_id = TreeHeader::load(header_guard.page()).root_page_id;
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut header_guard = Some(header_guard);
        let mut path: Vec<(WritePageGuard, PageId, usize)> = Vec::new();

        let mut guard = self.buffer_pool.fetch_page_write(root_id)?;
        let mut page_id = root_id;

        let mut leaf = loop {
            match deserialize_node::<K>(guard.page())? {
                BTreeNode::Leaf(leaf) => break leaf,
                BTreeNode::Internal(inner) => {
                    if inner.is_deletion_safe() {
                        header_guard = None;
                        path.clear();
                    }
                    let idx = inner.child_index(key);
                    let child_id = inner.children[idx];
                    path.push((guard, page_id, idx));
                    guard = self.buffer_pool.fetch_page_write(child_id)?;
                    page_id = child_id;
                }
            }
        };

        if !leaf.remove(key) {
            return Ok(());
        }

        let mut current = BTreeNode::Leaf(leaf);
        let mut current_guard = guard;
        let mut current_id = page_id;

        loop {
            if path.is_empty() {
                // current is the shallowest page this operation may touch;
                // with an empty path that is the root itself
                if let BTreeNode::Internal(inner) = &current {
                    if inner.is_underflow() {
                        let new_root_id = inner.children[0];
                        let mut header_guard = header_guard
                            .take()
                            .expect("root contraction implies the header guard was retained");
                        TreeHeader {
                            root_page_id: new_root_id,
                        }
                        .store(header_guard.page_mut());

                        drop(current_guard);
                        self.delete_tree_page(current_id)?;
                        return Ok(());
                    }
                }
                serialize_node(&current, current_guard.page_mut())?;
                return Ok(());
            }

            let underflow = match &current {
                BTreeNode::Leaf(leaf) => leaf.is_underflow(),
                BTreeNode::Internal(inner) => inner.is_underflow(),
            };
            if !underflow {
                serialize_node(&current, current_guard.page_mut())?;
                return Ok(());
            }

            let (mut parent_guard, parent_id, my_idx) =
                path.pop().expect("non-root underflow keeps its parent latched");
            let BTreeNode::Internal(mut parent) = deserialize_node::<K>(parent_guard.page())?
            else {
                return Err(BTreeError::InvalidPageFormat);
            };

            // prefer the right sibling; fall back to the left for the last child
            let (sibling_idx, separator_idx) = if my_idx < parent.size() {
                (my_idx + 1, my_idx)
            } else {
                (my_idx - 1, my_idx - 1)
            };
            let sibling_id = parent.children[sibling_idx];
            let mut sibling_guard = self.buffer_pool.fetch_page_write(sibling_id)?;
            let mut sibling = deserialize_node::<K>(sibling_guard.page())?;
            let sibling_is_right = sibling_idx > my_idx;

            if Self::try_steal(
                &mut current,
                &mut sibling,
                &mut parent,
                separator_idx,
                sibling_is_right,
            )? {
                serialize_node(&current, current_guard.page_mut())?;
                serialize_node(&sibling, sibling_guard.page_mut())?;
                serialize_node(&BTreeNode::Internal(parent), parent_guard.page_mut())?;
                return Ok(());
            }

            // merge right into left and drop the parent's separator
            let (mut left, mut left_guard, right, right_guard, right_id) = if sibling_is_right {
                (current, current_guard, sibling, sibling_guard, sibling_id)
            } else {
                (sibling, sibling_guard, current, current_guard, current_id)
            };

            Self::merge_into_left(&mut left, right, &mut parent, separator_idx)?;
            serialize_node(&left, left_guard.page_mut())?;

            drop(left_guard);
            drop(right_guard);
            self.delete_tree_page(right_id)?;

            current = BTreeNode::Internal(parent);
            current_guard = parent_guard;
            current_id = parent_id;
        }
    }

    /// Move one entry across the parent's separator if the sibling can spare
    /// it; returns false when a merge is required instead
    fn try_steal(
        current: &mut BTreeNode<K>,
        sibling: &mut BTreeNode<K>,
        parent: &mut InternalNode<K>,
        separator_idx: usize,
        sibling_is_right: bool,
    ) -> Result<bool, BTreeError> {
        match (current, sibling) {
            (BTreeNode::Leaf(current), BTreeNode::Leaf(sibling)) => {
                if !sibling.is_stealable() {
                    return Ok(false);
                }
                if sibling_is_right {
                    // sibling's first entry becomes our last; its new first
                    // key becomes the separator
                    let entry = sibling.entries.remove(0);
                    current.entries.push(entry);
                    parent.keys[separator_idx] = sibling.entries[0].0.clone();
                } else {
                    let entry = sibling.entries.pop().expect("stealable leaf is non-empty");
                    parent.keys[separator_idx] = entry.0.clone();
                    current.entries.insert(0, entry);
                }
                Ok(true)
            }
            (BTreeNode::Internal(current), BTreeNode::Internal(sibling)) => {
                if !sibling.is_stealable() {
                    return Ok(false);
                }
                if sibling_is_right {
                    // the parent's separator descends to us; the sibling's
                    // boundary key is promoted in its place
                    current.keys.push(parent.keys[separator_idx].clone());
                    current.children.push(sibling.children.remove(0));
                    parent.keys[separator_idx] = sibling.keys.remove(0);
                } else {
                    current.keys.insert(0, parent.keys[separator_idx].clone());
                    current
                        .children
                        .insert(0, sibling.children.pop().expect("internal page has children"));
                    parent.keys[separator_idx] =
                        sibling.keys.pop().expect("stealable internal page has keys");
                }
                Ok(true)
            }
            _ => Err(BTreeError::InvalidPageFormat),
        }
    }

    /// Fold `right` into `left`, pulling the parent's separator down for
    /// internal pages, and remove that separator from the parent
    fn merge_into_left(
        left: &mut BTreeNode<K>,
        right: BTreeNode<K>,
        parent: &mut InternalNode<K>,
        separator_idx: usize,
    ) -> Result<(), BTreeError> {
        match (left, right) {
            (BTreeNode::Leaf(left), BTreeNode::Leaf(right)) => {
                left.entries.extend(right.entries);
                left.next_page_id = right.next_page_id;
            }
            (BTreeNode::Internal(left), BTreeNode::Internal(right)) => {
                left.keys.push(parent.keys[separator_idx].clone());
                left.keys.extend(right.keys);
                left.children.extend(right.children);
            }
            _ => return Err(BTreeError::InvalidPageFormat),
        }
        parent.remove_at(separator_idx);
        Ok(())
    }

    /// Release an emptied tree page back to the pool. A lagging reader may
    /// still pin the page; it is unreachable from the tree either way, so
    /// the pin refusal is tolerated.
    fn delete_tree_page(&self, page_id: PageId) -> Result<(), BTreeError> {
        match self.buffer_pool.delete_page(page_id) {
            Ok(()) | Err(BufferPoolError::PagePinned(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
