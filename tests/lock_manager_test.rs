use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;

use onegadb::common::types::Rid;
use onegadb::transaction::concurrency::{
    AbortReason, IsolationLevel, LockManager, LockMode, TransactionManager, TransactionState,
};

const TABLE_A: u32 = 1;

fn setup() -> (Arc<LockManager>, Arc<TransactionManager>) {
    (
        Arc::new(LockManager::new()),
        Arc::new(TransactionManager::new()),
    )
}

#[test]
fn test_basic_lock_unlock() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Shared, TABLE_A)?);
    assert_eq!(txn.table_lock_mode(TABLE_A), Some(LockMode::Shared));

    assert!(lm.unlock_table(&txn, TABLE_A)?);
    assert_eq!(txn.table_lock_mode(TABLE_A), None);
    // releasing S under repeatable read starts the shrinking phase
    assert_eq!(txn.state(), TransactionState::Shrinking);

    Ok(())
}

#[test]
fn test_shared_locks_coexist() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A)?);
    assert!(lm.lock_table(&t2, LockMode::Shared, TABLE_A)?);

    assert!(lm.unlock_table(&t1, TABLE_A)?);
    assert!(lm.unlock_table(&t2, TABLE_A)?);

    Ok(())
}

#[test]
fn test_read_uncommitted_rejects_shared() {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::ReadUncommitted);

    let err = lm.lock_table(&txn, LockMode::Shared, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockSharedOnReadUncommitted);
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn test_lock_on_shrinking_rejected() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    lm.lock_table(&txn, LockMode::Shared, TABLE_A)?;
    lm.unlock_table(&txn, TABLE_A)?;
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let err = lm.lock_table(&txn, LockMode::Shared, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);

    Ok(())
}

#[test]
fn test_read_committed_allows_shared_while_shrinking() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::ReadCommitted);

    lm.lock_table(&txn, LockMode::Exclusive, TABLE_A)?;
    lm.unlock_table(&txn, TABLE_A)?;
    assert_eq!(txn.state(), TransactionState::Shrinking);

    // S and IS stay admissible; anything stronger does not
    assert!(lm.lock_table(&txn, LockMode::IntentionShared, TABLE_A)?);
    assert!(lm.lock_table(&txn, LockMode::Shared, TABLE_A)?);
    let err = lm
        .lock_table(&txn, LockMode::IntentionExclusive, TABLE_A)
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);

    Ok(())
}

#[test]
fn test_row_lock_rejects_intention_modes() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 1);

    lm.lock_table(&txn, LockMode::IntentionShared, TABLE_A)?;

    let err = lm
        .lock_row(&txn, LockMode::IntentionShared, TABLE_A, rid)
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedIntentionLockOnRow);

    Ok(())
}

#[test]
fn test_row_lock_requires_table_intention() -> Result<()> {
    let (lm, tm) = setup();
    let rid = Rid::new(1, 1);

    // no table lock at all
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let err = lm.lock_row(&t1, LockMode::Shared, TABLE_A, rid).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);

    // IS admits row S but not row X
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&t2, LockMode::IntentionShared, TABLE_A)?;
    assert!(lm.lock_row(&t2, LockMode::Shared, TABLE_A, rid)?);
    let err = lm
        .lock_row(&t2, LockMode::Exclusive, TABLE_A, Rid::new(1, 2))
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);

    // IX admits row X
    let t3 = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&t3, LockMode::IntentionExclusive, TABLE_A)?;
    assert!(lm.lock_row(&t3, LockMode::Exclusive, TABLE_A, Rid::new(1, 3))?);

    Ok(())
}

#[test]
fn test_unlock_table_before_rows_rejected() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 1);

    lm.lock_table(&txn, LockMode::IntentionExclusive, TABLE_A)?;
    lm.lock_row(&txn, LockMode::Exclusive, TABLE_A, rid)?;

    let err = lm.unlock_table(&txn, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableUnlockedBeforeUnlockingRows);

    Ok(())
}

#[test]
fn test_unlock_without_lock_rejected() {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    let err = lm.unlock_table(&txn, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedUnlockButNoLockHeld);
}

#[test]
fn test_forced_row_unlock_skips_shrink() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 1);

    lm.lock_table(&txn, LockMode::IntentionExclusive, TABLE_A)?;
    lm.lock_row(&txn, LockMode::Exclusive, TABLE_A, rid)?;

    lm.unlock_row(&txn, TABLE_A, rid, true)?;
    assert_eq!(txn.state(), TransactionState::Growing);

    lm.lock_row(&txn, LockMode::Exclusive, TABLE_A, rid)?;
    lm.unlock_row(&txn, TABLE_A, rid, false)?;
    assert_eq!(txn.state(), TransactionState::Shrinking);

    Ok(())
}

#[test]
fn test_same_mode_relock_is_noop() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Shared, TABLE_A)?);
    assert!(lm.lock_table(&txn, LockMode::Shared, TABLE_A)?);

    assert!(lm.unlock_table(&txn, TABLE_A)?);

    Ok(())
}

#[test]
fn test_incompatible_upgrade_rejected() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    lm.lock_table(&txn, LockMode::Exclusive, TABLE_A)?;
    let err = lm.lock_table(&txn, LockMode::Shared, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::IncompatibleUpgrade);

    Ok(())
}

#[test]
fn test_upgrade_conflict_rejected() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let t3 = tm.begin(IsolationLevel::RepeatableRead);

    lm.lock_table(&t1, LockMode::Shared, TABLE_A)?;
    lm.lock_table(&t2, LockMode::Shared, TABLE_A)?;
    lm.lock_table(&t3, LockMode::Shared, TABLE_A)?;

    // t2 starts an upgrade and blocks behind t1/t3's shared locks
    let lm_clone = lm.clone();
    let t2_clone = t2.clone();
    let waiter = std::thread::spawn(move || {
        lm_clone.lock_table(&t2_clone, LockMode::Exclusive, TABLE_A)
    });

    // wait until the queue registers the upgrade
    std::thread::sleep(Duration::from_millis(50));

    let err = lm.lock_table(&t3, LockMode::Exclusive, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::UpgradeConflict);

    // aborting t3 releases its share; t1 releasing completes the upgrade
    lm.unlock_table(&t3, TABLE_A)?;
    lm.unlock_table(&t1, TABLE_A)?;
    assert!(waiter.join().unwrap()?);
    assert_eq!(t2.table_lock_mode(TABLE_A), Some(LockMode::Exclusive));

    Ok(())
}

#[test]
fn test_upgrade_beats_plain_waiter() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let t3 = tm.begin(IsolationLevel::RepeatableRead);

    lm.lock_table(&t1, LockMode::Shared, TABLE_A)?;
    lm.lock_table(&t2, LockMode::Shared, TABLE_A)?;

    // t3 queues a plain X request
    let lm_t3 = lm.clone();
    let t3_clone = t3.clone();
    let plain_waiter = std::thread::spawn(move || {
        lm_t3.lock_table(&t3_clone, LockMode::Exclusive, TABLE_A)
    });
    std::thread::sleep(Duration::from_millis(50));

    // t1 upgrades S -> X; the upgrade request goes to the front
    let lm_t1 = lm.clone();
    let t1_clone = t1.clone();
    let upgrader = std::thread::spawn(move || {
        lm_t1.lock_table(&t1_clone, LockMode::Exclusive, TABLE_A)
    });
    std::thread::sleep(Duration::from_millis(50));

    // t2's release leaves the queue to the upgrader first
    lm.unlock_table(&t2, TABLE_A)?;

    assert!(upgrader.join().unwrap()?);
    assert_eq!(t1.table_lock_mode(TABLE_A), Some(LockMode::Exclusive));
    // the plain waiter is still blocked behind t1's exclusive lock
    assert_eq!(t3.table_lock_mode(TABLE_A), None);

    lm.unlock_table(&t1, TABLE_A)?;
    assert!(plain_waiter.join().unwrap()?);
    assert_eq!(t3.table_lock_mode(TABLE_A), Some(LockMode::Exclusive));

    Ok(())
}

#[test]
fn test_fifo_batch_grant() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let t3 = tm.begin(IsolationLevel::RepeatableRead);

    lm.lock_table(&t1, LockMode::Exclusive, TABLE_A)?;

    // two shared requests queue behind the exclusive holder
    let mut waiters = Vec::new();
    for txn in [t2.clone(), t3.clone()] {
        let lm = lm.clone();
        waiters.push(std::thread::spawn(move || {
            lm.lock_table(&txn, LockMode::Shared, TABLE_A)
        }));
    }
    std::thread::sleep(Duration::from_millis(50));

    // releasing X grants both compatible waiters in one pass
    lm.unlock_table(&t1, TABLE_A)?;
    for waiter in waiters {
        assert!(waiter.join().unwrap()?);
    }
    assert_eq!(t2.table_lock_mode(TABLE_A), Some(LockMode::Shared));
    assert_eq!(t3.table_lock_mode(TABLE_A), Some(LockMode::Shared));

    Ok(())
}

#[test]
fn test_deadlock_detection_aborts_youngest() -> Result<()> {
    let (lm, tm) = setup();
    let r1 = Rid::new(1, 1);
    let r2 = Rid::new(1, 2);

    let t_old = tm.begin(IsolationLevel::RepeatableRead);
    let t_young = tm.begin(IsolationLevel::RepeatableRead);

    lm.lock_table(&t_old, LockMode::IntentionExclusive, TABLE_A)?;
    lm.lock_table(&t_young, LockMode::IntentionExclusive, TABLE_A)?;

    lm.lock_row(&t_old, LockMode::Exclusive, TABLE_A, r1)?;
    lm.lock_row(&t_young, LockMode::Exclusive, TABLE_A, r2)?;

    let detector = lm.start_cycle_detection(tm.clone(), Duration::from_millis(50));

    // t_old wants r2 (held by t_young); t_young wants r1 (held by t_old)
    let lm_old = lm.clone();
    let t_old_clone = t_old.clone();
    let old_waiter = std::thread::spawn(move || {
        lm_old.lock_row(&t_old_clone, LockMode::Exclusive, TABLE_A, r2)
    });
    std::thread::sleep(Duration::from_millis(20));

    let lm_young = lm.clone();
    let t_young_clone = t_young.clone();
    let young_waiter = std::thread::spawn(move || {
        lm_young.lock_row(&t_young_clone, LockMode::Exclusive, TABLE_A, r1)
    });

    // the detector aborts exactly the younger transaction
    assert!(!young_waiter.join().unwrap()?);
    assert_eq!(t_young.state(), TransactionState::Aborted);
    assert_eq!(t_old.state(), TransactionState::Growing);

    // rolling the victim back frees r2, and the elder proceeds
    lm.release_all_locks(&t_young);
    assert!(old_waiter.join().unwrap()?);
    assert_eq!(t_old.row_lock_mode(TABLE_A, r2), Some(LockMode::Exclusive));

    detector.shutdown();

    Ok(())
}

#[test]
fn test_wait_for_edges_snapshot() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    lm.lock_table(&t1, LockMode::Exclusive, TABLE_A)?;

    let lm_clone = lm.clone();
    let t2_clone = t2.clone();
    let waiter = std::thread::spawn(move || {
        lm_clone.lock_table(&t2_clone, LockMode::Shared, TABLE_A)
    });
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(lm.wait_for_edges(), vec![(t2.id(), t1.id())]);

    lm.unlock_table(&t1, TABLE_A)?;
    assert!(waiter.join().unwrap()?);
    assert!(lm.wait_for_edges().is_empty());

    Ok(())
}
