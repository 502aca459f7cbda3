use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use super::transaction::{IsolationLevel, Transaction, TransactionState};

/// Registry of active transactions. Ids increase monotonically, which the
/// deadlock detector relies on to identify the youngest member of a cycle.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Look up an active transaction by id
    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Mark a transaction committed and retire it from the registry
    pub fn commit(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Committed);
        self.active_transactions.lock().remove(&txn.id());
    }

    /// Mark a transaction aborted and retire it from the registry. Lock
    /// release and rollback are the caller's responsibility.
    pub fn abort(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Aborted);
        self.active_transactions.lock().remove(&txn.id());
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }
}
