// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use index::btree::{BTreeError, BTreeIndex};
pub use storage::buffer::{BufferPoolError, BufferPoolManager, LruKReplacer};
pub use storage::disk::DiskManager;
pub use transaction::concurrency::{
    IsolationLevel, LockManager, LockMode, Transaction, TransactionAbort, TransactionManager,
};
