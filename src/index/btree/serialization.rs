use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{Page, Rid, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode};

// Page layout:
// - page_type: u8 (1 = leaf, 2 = internal)
// - size: u16 (entry count for leaves, separator count for internal pages)
// - max_size: u16
// - next_page_id: u32 (leaves only, 0 when the chain ends)
// - value_offset: u16 (where rids / child pointers begin)
// - keys: per key a u16 length prefix + bincode bytes
// - at value_offset: rids as (page_id u32, slot u32), or child ids as u32
const PAGE_TYPE_LEAF: u8 = 1;
const PAGE_TYPE_INTERNAL: u8 = 2;
pub(crate) const NODE_HEADER_SIZE: usize = 11;

/// Serialize a B+Tree node into a page buffer
pub fn serialize_node<K>(node: &BTreeNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Clone + Ord + Serialize,
{
    page.reset();

    let (page_type, size, max_size, next_page_id) = match node {
        BTreeNode::Leaf(leaf) => (PAGE_TYPE_LEAF, leaf.size(), leaf.max_size, leaf.next_page_id),
        BTreeNode::Internal(inner) => (PAGE_TYPE_INTERNAL, inner.size(), inner.max_size, 0),
    };

    page.data[0] = page_type;
    LittleEndian::write_u16(&mut page.data[1..3], size as u16);
    LittleEndian::write_u16(&mut page.data[3..5], max_size as u16);
    LittleEndian::write_u32(&mut page.data[5..9], next_page_id);

    let mut offset = NODE_HEADER_SIZE;

    let mut write_key = |offset: &mut usize, key: &K| -> Result<(), BTreeError> {
        let key_bytes = bincode::serialize(key)
            .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
        if *offset + 2 + key_bytes.len() > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge);
        }
        LittleEndian::write_u16(&mut page.data[*offset..*offset + 2], key_bytes.len() as u16);
        *offset += 2;
        page.data[*offset..*offset + key_bytes.len()].copy_from_slice(&key_bytes);
        *offset += key_bytes.len();
        Ok(())
    };

    match node {
        BTreeNode::Leaf(leaf) => {
            for (key, _) in &leaf.entries {
                write_key(&mut offset, key)?;
            }
        }
        BTreeNode::Internal(inner) => {
            for key in &inner.keys {
                write_key(&mut offset, key)?;
            }
        }
    }

    let value_offset = offset;
    LittleEndian::write_u16(&mut page.data[9..11], value_offset as u16);

    match node {
        BTreeNode::Leaf(leaf) => {
            if offset + leaf.entries.len() * 8 > PAGE_SIZE {
                return Err(BTreeError::NodeTooLarge);
            }
            for (_, rid) in &leaf.entries {
                LittleEndian::write_u32(&mut page.data[offset..offset + 4], rid.page_id);
                offset += 4;
                LittleEndian::write_u32(&mut page.data[offset..offset + 4], rid.slot_num);
                offset += 4;
            }
        }
        BTreeNode::Internal(inner) => {
            if offset + inner.children.len() * 4 > PAGE_SIZE {
                return Err(BTreeError::NodeTooLarge);
            }
            for child in &inner.children {
                LittleEndian::write_u32(&mut page.data[offset..offset + 4], *child);
                offset += 4;
            }
        }
    }

    Ok(())
}

/// Deserialize a B+Tree node from a page buffer
pub fn deserialize_node<K>(page: &Page) -> Result<BTreeNode<K>, BTreeError>
where
    K: Clone + Ord + DeserializeOwned,
{
    let page_type = page.data[0];
    let size = LittleEndian::read_u16(&page.data[1..3]) as usize;
    let max_size = LittleEndian::read_u16(&page.data[3..5]) as usize;
    let next_page_id = LittleEndian::read_u32(&page.data[5..9]);
    let value_offset = LittleEndian::read_u16(&page.data[9..11]) as usize;

    if value_offset > PAGE_SIZE {
        return Err(BTreeError::InvalidPageFormat);
    }

    let mut offset = NODE_HEADER_SIZE;
    let mut keys = Vec::with_capacity(size);
    for _ in 0..size {
        if offset + 2 > value_offset {
            return Err(BTreeError::InvalidPageFormat);
        }
        let key_len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
        offset += 2;
        if offset + key_len > value_offset {
            return Err(BTreeError::InvalidPageFormat);
        }
        let key = bincode::deserialize(&page.data[offset..offset + key_len])
            .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
        keys.push(key);
        offset += key_len;
    }

    let mut offset = value_offset;
    match page_type {
        PAGE_TYPE_LEAF => {
            if offset + size * 8 > PAGE_SIZE {
                return Err(BTreeError::InvalidPageFormat);
            }
            let mut entries = Vec::with_capacity(size);
            for key in keys {
                let page_id = LittleEndian::read_u32(&page.data[offset..offset + 4]);
                offset += 4;
                let slot_num = LittleEndian::read_u32(&page.data[offset..offset + 4]);
                offset += 4;
                entries.push((key, Rid::new(page_id, slot_num)));
            }
            Ok(BTreeNode::Leaf(LeafNode {
                max_size,
                entries,
                next_page_id,
            }))
        }
        PAGE_TYPE_INTERNAL => {
            if offset + (size + 1) * 4 > PAGE_SIZE {
                return Err(BTreeError::InvalidPageFormat);
            }
            let mut children = Vec::with_capacity(size + 1);
            for _ in 0..size + 1 {
                children.push(LittleEndian::read_u32(&page.data[offset..offset + 4]));
                offset += 4;
            }
            Ok(BTreeNode::Internal(InternalNode {
                max_size,
                keys,
                children,
            }))
        }
        _ => Err(BTreeError::InvalidPageFormat),
    }
}
