use std::collections::{HashMap, HashSet};
use parking_lot::Mutex;

use crate::common::types::{Rid, TableOid, TxnId};
use super::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Locks a transaction currently holds, one set per mode so the lock
/// manager can release exactly what was granted
#[derive(Debug, Default)]
pub(crate) struct LockSets {
    pub shared_tables: HashSet<TableOid>,
    pub exclusive_tables: HashSet<TableOid>,
    pub intention_shared_tables: HashSet<TableOid>,
    pub intention_exclusive_tables: HashSet<TableOid>,
    pub shared_intention_exclusive_tables: HashSet<TableOid>,
    pub shared_rows: HashMap<TableOid, HashSet<Rid>>,
    pub exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

impl LockSets {
    fn table_set(&mut self, mode: LockMode) -> &mut HashSet<TableOid> {
        match mode {
            LockMode::Shared => &mut self.shared_tables,
            LockMode::Exclusive => &mut self.exclusive_tables,
            LockMode::IntentionShared => &mut self.intention_shared_tables,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_tables,
        }
    }
}

/// An active transaction as the lock manager sees it: an id, an isolation
/// level, a 2PL state, and the locks held. Log management, undo and the
/// like live with the transaction manager's callers, not here.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    locks: Mutex<LockSets>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            locks: Mutex::new(LockSets::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Mode of the table lock held on `oid`, if any; the strongest wins
    /// when several are recorded
    pub fn table_lock_mode(&self, oid: TableOid) -> Option<LockMode> {
        let locks = self.locks.lock();
        if locks.exclusive_tables.contains(&oid) {
            Some(LockMode::Exclusive)
        } else if locks.shared_intention_exclusive_tables.contains(&oid) {
            Some(LockMode::SharedIntentionExclusive)
        } else if locks.intention_exclusive_tables.contains(&oid) {
            Some(LockMode::IntentionExclusive)
        } else if locks.shared_tables.contains(&oid) {
            Some(LockMode::Shared)
        } else if locks.intention_shared_tables.contains(&oid) {
            Some(LockMode::IntentionShared)
        } else {
            None
        }
    }

    /// Mode of the row lock held on `(oid, rid)`, if any
    pub fn row_lock_mode(&self, oid: TableOid, rid: Rid) -> Option<LockMode> {
        let locks = self.locks.lock();
        if locks
            .exclusive_rows
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
        {
            Some(LockMode::Exclusive)
        } else if locks
            .shared_rows
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
        {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    /// Number of rows of `oid` this transaction still has locked
    pub fn locked_row_count(&self, oid: TableOid) -> usize {
        let locks = self.locks.lock();
        locks.shared_rows.get(&oid).map_or(0, HashSet::len)
            + locks.exclusive_rows.get(&oid).map_or(0, HashSet::len)
    }

    pub(crate) fn record_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.locks.lock().table_set(mode).insert(oid);
    }

    pub(crate) fn erase_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.locks.lock().table_set(mode).remove(&oid);
    }

    pub(crate) fn record_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut locks = self.locks.lock();
        let rows = match mode {
            LockMode::Shared => &mut locks.shared_rows,
            LockMode::Exclusive => &mut locks.exclusive_rows,
            _ => return,
        };
        rows.entry(oid).or_default().insert(rid);
    }

    /// Every table lock currently held, with its mode
    pub(crate) fn snapshot_table_locks(&self) -> Vec<(LockMode, TableOid)> {
        let locks = self.locks.lock();
        let mut held = Vec::new();
        held.extend(locks.shared_tables.iter().map(|&o| (LockMode::Shared, o)));
        held.extend(locks.exclusive_tables.iter().map(|&o| (LockMode::Exclusive, o)));
        held.extend(
            locks
                .intention_shared_tables
                .iter()
                .map(|&o| (LockMode::IntentionShared, o)),
        );
        held.extend(
            locks
                .intention_exclusive_tables
                .iter()
                .map(|&o| (LockMode::IntentionExclusive, o)),
        );
        held.extend(
            locks
                .shared_intention_exclusive_tables
                .iter()
                .map(|&o| (LockMode::SharedIntentionExclusive, o)),
        );
        held
    }

    /// Every row lock currently held
    pub(crate) fn snapshot_row_locks(&self) -> Vec<(TableOid, Rid)> {
        let locks = self.locks.lock();
        let mut held = Vec::new();
        for (&oid, rows) in locks.shared_rows.iter().chain(locks.exclusive_rows.iter()) {
            held.extend(rows.iter().map(|&rid| (oid, rid)));
        }
        held
    }

    pub(crate) fn erase_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut locks = self.locks.lock();
        let rows = match mode {
            LockMode::Shared => &mut locks.shared_rows,
            LockMode::Exclusive => &mut locks.exclusive_rows,
            _ => return,
        };
        if let Some(set) = rows.get_mut(&oid) {
            set.remove(&rid);
        }
    }
}
