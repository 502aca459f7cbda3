pub mod deadlock;
pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

// Public exports
pub use deadlock::DeadlockDetector;
pub use lock_manager::{AbortReason, LockManager, LockMode, TransactionAbort};
pub use transaction::{IsolationLevel, Transaction, TransactionState};
pub use transaction_manager::TransactionManager;
