use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId};
use super::transaction::{IsolationLevel, Transaction, TransactionState};

/// Hierarchical lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
    IntentionShared,
    IntentionExclusive,
    SharedIntentionExclusive,
}

/// Why a transaction was aborted by lock-manager policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    AttemptedIntentionLockOnRow,
    TableLockNotPresent,
    TableUnlockedBeforeUnlockingRows,
    AttemptedUnlockButNoLockHeld,
    UpgradeConflict,
    IncompatibleUpgrade,
}

/// Raised on any policy violation; the transaction has already been moved
/// to the Aborted state when this surfaces, so the caller must roll back.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason:?}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// True when the two modes may be granted concurrently
pub fn locks_compatible(l1: LockMode, l2: LockMode) -> bool {
    use LockMode::*;
    match l1 {
        IntentionShared => matches!(l2, IntentionShared | IntentionExclusive | Shared | SharedIntentionExclusive),
        IntentionExclusive => matches!(l2, IntentionShared | IntentionExclusive),
        Shared => matches!(l2, IntentionShared | Shared),
        SharedIntentionExclusive => matches!(l2, IntentionShared),
        Exclusive => false,
    }
}

/// True when a held lock may be upgraded to the requested mode
pub fn can_upgrade(current: LockMode, requested: LockMode) -> bool {
    use LockMode::*;
    if current == requested {
        return true;
    }
    match current {
        IntentionShared => matches!(requested, Shared | Exclusive | IntentionExclusive | SharedIntentionExclusive),
        Shared => matches!(requested, Exclusive | SharedIntentionExclusive),
        IntentionExclusive => matches!(requested, Exclusive | SharedIntentionExclusive),
        SharedIntentionExclusive => matches!(requested, Exclusive),
        Exclusive => false,
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LockRequest {
    pub(crate) txn_id: TxnId,
    pub(crate) mode: LockMode,
    pub(crate) granted: bool,
}

impl LockRequest {
    fn new(txn_id: TxnId, mode: LockMode) -> Self {
        Self {
            txn_id,
            mode,
            granted: false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub(crate) requests: VecDeque<LockRequest>,
    pub(crate) upgrading: Option<TxnId>,
}

/// Per-object request queue: FIFO with batch granting of compatible
/// waiters, upgraders jumping to the front
#[derive(Default)]
pub(crate) struct LockRequestQueue {
    pub(crate) state: Mutex<QueueState>,
    pub(crate) cv: Condvar,
}

/// What a request is locking; routes the transaction-side bookkeeping
#[derive(Debug, Clone, Copy)]
enum LockObject {
    Table(TableOid),
    Row(TableOid, Rid),
}

impl LockObject {
    fn record(&self, txn: &Transaction, mode: LockMode) {
        match *self {
            LockObject::Table(oid) => txn.record_table_lock(mode, oid),
            LockObject::Row(oid, rid) => txn.record_row_lock(mode, oid, rid),
        }
    }

    fn erase(&self, txn: &Transaction, mode: LockMode) {
        match *self {
            LockObject::Table(oid) => txn.erase_table_lock(mode, oid),
            LockObject::Row(oid, rid) => txn.erase_row_lock(mode, oid, rid),
        }
    }
}

/// Hierarchical two-phase lock manager over tables and rows.
///
/// Each lockable object gets its own request queue; the two maps only ever
/// hold their mutex long enough to hand out the queue Arc. Blocking happens
/// on the queue's condition variable, and waiters are granted by whichever
/// thread releases a lock (or by the deadlock detector waking them to
/// discover their abort).
pub struct LockManager {
    pub(crate) table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    pub(crate) row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a table lock. Ok(false) means the transaction was aborted
    /// while waiting (deadlock victim or external abort).
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        check_table_admission(txn, mode)?;

        let queue = {
            let mut map = self.table_lock_map.lock();
            map.entry(oid).or_default().clone()
        };

        self.acquire(txn, mode, LockObject::Table(oid), &queue)
    }

    /// Release a table lock; every row lock on the table must be gone first
    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        let queue = {
            let map = self.table_lock_map.lock();
            map.get(&oid).cloned()
        };
        let Some(queue) = queue else {
            return Err(abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mode = {
            let mut state = queue.state.lock();
            let Some(pos) = state
                .requests
                .iter()
                .position(|r| r.txn_id == txn.id() && r.granted)
            else {
                return Err(abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
            };

            if txn.locked_row_count(oid) > 0 {
                return Err(abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
            }

            let mode = state.requests[pos].mode;
            state.requests.remove(pos);
            grant_waiters(&mut state);
            queue.cv.notify_all();
            mode
        };

        txn.erase_table_lock(mode, oid);
        apply_shrink_transition(txn, mode);

        Ok(true)
    }

    /// Acquire a row lock; the matching table intention must already be held
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        check_row_admission(txn, mode)?;

        if !table_lock_covers_row(txn.table_lock_mode(oid), mode) {
            return Err(abort(txn, AbortReason::TableLockNotPresent));
        }

        let queue = {
            let mut map = self.row_lock_map.lock();
            map.entry(rid).or_default().clone()
        };

        self.acquire(txn, mode, LockObject::Row(oid, rid), &queue)
    }

    /// Release a row lock. `force` skips the 2PL state transition, for
    /// callers unwinding partial work rather than shrinking.
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
        force: bool,
    ) -> Result<bool, TransactionAbort> {
        let queue = {
            let map = self.row_lock_map.lock();
            map.get(&rid).cloned()
        };
        let Some(queue) = queue else {
            return Err(abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mode = {
            let mut state = queue.state.lock();
            let Some(pos) = state
                .requests
                .iter()
                .position(|r| r.txn_id == txn.id() && r.granted)
            else {
                return Err(abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
            };

            let mode = state.requests[pos].mode;
            state.requests.remove(pos);
            grant_waiters(&mut state);
            queue.cv.notify_all();
            mode
        };

        txn.erase_row_lock(mode, oid, rid);
        if !force {
            apply_shrink_transition(txn, mode);
        }

        Ok(true)
    }

    /// Release everything a transaction still holds, rows before tables.
    /// This is the unwind path for committed or aborted transactions, so
    /// missing locks are tolerated and no state transitions fire.
    pub fn release_all_locks(&self, txn: &Arc<Transaction>) {
        for (oid, rid) in txn.snapshot_row_locks() {
            let _ = self.unlock_row(txn, oid, rid, true);
        }
        for (_, oid) in txn.snapshot_table_locks() {
            let _ = self.unlock_table(txn, oid);
        }
    }

    /// Shared acquisition path for tables and rows
    fn acquire(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        object: LockObject,
        queue: &LockRequestQueue,
    ) -> Result<bool, TransactionAbort> {
        let mut state = queue.state.lock();

        if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn.id()) {
            let existing = state.requests[pos];

            if existing.granted && existing.mode == mode {
                return Ok(true);
            }
            if state.upgrading.is_some() {
                return Err(abort(txn, AbortReason::UpgradeConflict));
            }
            if !can_upgrade(existing.mode, mode) {
                return Err(abort(txn, AbortReason::IncompatibleUpgrade));
            }

            // the old lock dissolves into the upgrade: release it without a
            // shrink transition and queue the new request ahead of waiters
            object.erase(txn, existing.mode);
            state.requests.remove(pos);
            state.upgrading = Some(txn.id());
            state.requests.push_front(LockRequest::new(txn.id(), mode));
        } else {
            state.requests.push_back(LockRequest::new(txn.id(), mode));
        }

        let grantable = state
            .requests
            .iter()
            .filter(|r| r.granted)
            .all(|r| locks_compatible(r.mode, mode));

        if grantable {
            let pos = state
                .requests
                .iter()
                .position(|r| r.txn_id == txn.id())
                .expect("request was just queued");
            state.requests[pos].granted = true;
            if state.upgrading == Some(txn.id()) {
                state.upgrading = None;
            }
            drop(state);
            object.record(txn, mode);
            return Ok(true);
        }

        loop {
            queue.cv.wait(&mut state);

            if txn.state() == TransactionState::Aborted {
                if state.upgrading == Some(txn.id()) {
                    state.upgrading = None;
                }
                if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn.id()) {
                    state.requests.remove(pos);
                }
                grant_waiters(&mut state);
                queue.cv.notify_all();
                return Ok(false);
            }

            let granted = state
                .requests
                .iter()
                .any(|r| r.txn_id == txn.id() && r.granted);
            if granted {
                if state.upgrading == Some(txn.id()) {
                    state.upgrading = None;
                }
                drop(state);
                object.record(txn, mode);
                return Ok(true);
            }
        }
    }
}

/// Set the transaction Aborted and build the error for the caller
fn abort(txn: &Arc<Transaction>, reason: AbortReason) -> TransactionAbort {
    txn.set_state(TransactionState::Aborted);
    TransactionAbort {
        txn_id: txn.id(),
        reason,
    }
}

/// Isolation-level admission rules for table locks
fn check_table_admission(txn: &Arc<Transaction>, mode: LockMode) -> Result<(), TransactionAbort> {
    use LockMode::*;
    let shrinking = txn.state() == TransactionState::Shrinking;

    match txn.isolation_level() {
        IsolationLevel::ReadUncommitted => {
            if matches!(mode, Shared | IntentionShared | SharedIntentionExclusive) {
                return Err(abort(txn, AbortReason::LockSharedOnReadUncommitted));
            }
            if shrinking {
                return Err(abort(txn, AbortReason::LockOnShrinking));
            }
        }
        IsolationLevel::ReadCommitted => {
            if shrinking && !matches!(mode, Shared | IntentionShared) {
                return Err(abort(txn, AbortReason::LockOnShrinking));
            }
        }
        IsolationLevel::RepeatableRead => {
            if shrinking {
                return Err(abort(txn, AbortReason::LockOnShrinking));
            }
        }
    }

    Ok(())
}

/// Row locks additionally reject intention modes outright
fn check_row_admission(txn: &Arc<Transaction>, mode: LockMode) -> Result<(), TransactionAbort> {
    use LockMode::*;
    if matches!(mode, IntentionShared | IntentionExclusive | SharedIntentionExclusive) {
        return Err(abort(txn, AbortReason::AttemptedIntentionLockOnRow));
    }
    check_table_admission(txn, mode)
}

/// The table lock that must already be held before locking a row
fn table_lock_covers_row(table_mode: Option<LockMode>, row_mode: LockMode) -> bool {
    use LockMode::*;
    match row_mode {
        Shared => matches!(
            table_mode,
            Some(IntentionShared | Shared | IntentionExclusive | SharedIntentionExclusive | Exclusive)
        ),
        Exclusive => matches!(
            table_mode,
            Some(IntentionExclusive | SharedIntentionExclusive | Exclusive)
        ),
        _ => false,
    }
}

/// Releasing X always starts shrinking; releasing S does under repeatable
/// read. Only a growing transaction transitions; an aborted waiter must not
/// be resurrected by its own unlocks.
fn apply_shrink_transition(txn: &Arc<Transaction>, released: LockMode) {
    if txn.state() != TransactionState::Growing {
        return;
    }
    let shrink = match released {
        LockMode::Exclusive => true,
        LockMode::Shared => txn.isolation_level() == IsolationLevel::RepeatableRead,
        _ => false,
    };
    if shrink {
        txn.set_state(TransactionState::Shrinking);
    }
}

/// Grant policy: scan in queue order, promoting every ungranted request
/// compatible with all currently granted ones; stop at the first conflict
/// so waiters behind it keep their place.
pub(crate) fn grant_waiters(state: &mut QueueState) {
    let mut granted: Vec<LockMode> = state
        .requests
        .iter()
        .filter(|r| r.granted)
        .map(|r| r.mode)
        .collect();

    for i in 0..state.requests.len() {
        if state.requests[i].granted {
            continue;
        }
        if granted.iter().all(|&g| locks_compatible(g, state.requests[i].mode)) {
            state.requests[i].granted = true;
            granted.push(state.requests[i].mode);
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_matrix() {
        use LockMode::*;

        let modes = [Shared, Exclusive, IntentionShared, IntentionExclusive, SharedIntentionExclusive];

        // symmetric by construction
        for &a in &modes {
            for &b in &modes {
                assert_eq!(locks_compatible(a, b), locks_compatible(b, a));
            }
        }

        assert!(locks_compatible(IntentionShared, SharedIntentionExclusive));
        assert!(locks_compatible(IntentionExclusive, IntentionExclusive));
        assert!(locks_compatible(Shared, Shared));
        assert!(!locks_compatible(Shared, IntentionExclusive));
        assert!(!locks_compatible(SharedIntentionExclusive, Shared));
        for &m in &modes {
            assert!(!locks_compatible(Exclusive, m));
        }
    }

    #[test]
    fn test_upgrade_lattice() {
        use LockMode::*;

        assert!(can_upgrade(IntentionShared, Shared));
        assert!(can_upgrade(IntentionShared, Exclusive));
        assert!(can_upgrade(IntentionShared, IntentionExclusive));
        assert!(can_upgrade(IntentionShared, SharedIntentionExclusive));
        assert!(can_upgrade(Shared, Exclusive));
        assert!(can_upgrade(Shared, SharedIntentionExclusive));
        assert!(can_upgrade(IntentionExclusive, Exclusive));
        assert!(can_upgrade(SharedIntentionExclusive, Exclusive));

        assert!(!can_upgrade(Shared, IntentionShared));
        assert!(!can_upgrade(Exclusive, Shared));
        assert!(!can_upgrade(SharedIntentionExclusive, IntentionExclusive));

        // same-mode is a no-op success
        assert!(can_upgrade(Exclusive, Exclusive));
    }

    #[test]
    fn test_grant_waiters_batches_compatible() {
        use LockMode::*;
        let mut state = QueueState::default();
        state.requests.push_back(LockRequest {
            txn_id: 1,
            mode: Shared,
            granted: true,
        });
        state.requests.push_back(LockRequest::new(2, Shared));
        state.requests.push_back(LockRequest::new(3, Exclusive));
        state.requests.push_back(LockRequest::new(4, Shared));

        grant_waiters(&mut state);

        // the second shared joins the holder, the exclusive blocks, and the
        // shared behind it must keep waiting for fairness
        assert!(state.requests[1].granted);
        assert!(!state.requests[2].granted);
        assert!(!state.requests[3].granted);
    }

    #[test]
    fn test_row_cover_requirements() {
        use LockMode::*;

        for held in [IntentionShared, Shared, IntentionExclusive, SharedIntentionExclusive, Exclusive] {
            assert!(table_lock_covers_row(Some(held), Shared));
        }
        assert!(!table_lock_covers_row(None, Shared));

        for held in [IntentionExclusive, SharedIntentionExclusive, Exclusive] {
            assert!(table_lock_covers_row(Some(held), Exclusive));
        }
        assert!(!table_lock_covers_row(Some(Shared), Exclusive));
        assert!(!table_lock_covers_row(Some(IntentionShared), Exclusive));
    }
}
