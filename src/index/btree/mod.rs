pub mod error;
pub mod header;
pub mod index;
pub mod node;
pub mod serialization;

pub use error::BTreeError;
pub use header::TreeHeader;
pub use index::{BTreeIndex, TreeIterator};
pub use node::{BTreeNode, InternalNode, LeafNode};
pub use serialization::{deserialize_node, serialize_node};
